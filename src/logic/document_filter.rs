use anyhow::{anyhow, bail, Result};
use bson::{Bson, Document};
use std::cmp::Ordering;

/// Resolve a dotted path such as `address.city` against a document.
///
/// Numeric segments index into arrays.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Set a dotted path, creating intermediate documents as needed
pub fn assign(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                assign(inner, rest, value);
            }
        }
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Position of a value's type in the server's cross-type sort order
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

/// Total order over BSON values, numbers compared by value across widths
pub fn compare(left: &Bson, right: &Bson) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left, right) {
        _ if as_f64(left).is_some() && as_f64(right).is_some() => {
            let (l, r) = (as_f64(left).unwrap_or_default(), as_f64(right).unwrap_or_default());
            l.partial_cmp(&r).unwrap_or(Ordering::Equal)
        }
        (Bson::String(l), Bson::String(r)) => l.cmp(r),
        (Bson::Boolean(l), Bson::Boolean(r)) => l.cmp(r),
        (Bson::DateTime(l), Bson::DateTime(r)) => l.cmp(r),
        (Bson::ObjectId(l), Bson::ObjectId(r)) => l.bytes().cmp(&r.bytes()),
        (Bson::Timestamp(l), Bson::Timestamp(r)) => (l.time, l.increment).cmp(&(r.time, r.increment)),
        (Bson::Array(l), Bson::Array(r)) => compare_sequences(l.iter(), r.iter()),
        (Bson::Document(l), Bson::Document(r)) => {
            for ((lk, lv), (rk, rv)) in l.iter().zip(r.iter()) {
                let ordering = lk.cmp(rk).then_with(|| compare(lv, rv));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            l.len().cmp(&r.len())
        }
        _ => Ordering::Equal,
    }
}

fn compare_sequences<'a>(
    left: impl Iterator<Item = &'a Bson>,
    right: impl Iterator<Item = &'a Bson>,
) -> Ordering {
    let left: Vec<_> = left.collect();
    let right: Vec<_> = right.collect();
    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = compare(l, r);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    compare(left, right) == Ordering::Equal
}

/// Equality as a query sees it: a missing field equals null and an array
/// field matches when any element does.
fn field_equals(field: Option<&Bson>, target: &Bson) -> bool {
    match field {
        None => matches!(target, Bson::Null),
        Some(Bson::Array(items)) if !matches!(target, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, target))
        }
        Some(value) => values_equal(value, target),
    }
}

/// Ordered comparison only between values of the same type bracket
fn field_compares(field: Option<&Bson>, target: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let check = |value: &Bson| type_rank(value) == type_rank(target) && accept(compare(value, target));
    match field {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn in_list(field: Option<&Bson>, operand: &Bson, operator: &str) -> Result<bool> {
    let Bson::Array(candidates) = operand else {
        bail!("{} needs an array", operator);
    };
    Ok(candidates.iter().any(|candidate| field_equals(field, candidate)))
}

/// Apply one `{ "$op": operand, ... }` block to a field value
fn matches_operators(field: Option<&Bson>, operators: &Document) -> Result<bool> {
    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => field_equals(field, operand),
            "$ne" => !field_equals(field, operand),
            "$gt" => field_compares(field, operand, |o| o == Ordering::Greater),
            "$gte" => field_compares(field, operand, |o| o != Ordering::Less),
            "$lt" => field_compares(field, operand, |o| o == Ordering::Less),
            "$lte" => field_compares(field, operand, |o| o != Ordering::Greater),
            "$in" => in_list(field, operand, "$in")?,
            "$nin" => !in_list(field, operand, "$nin")?,
            "$exists" => {
                let wanted = match operand {
                    Bson::Boolean(flag) => *flag,
                    other => as_f64(other).map(|n| n != 0.0).unwrap_or(true),
                };
                field.is_some() == wanted
            }
            "$not" => match operand {
                Bson::Document(inner) => !matches_operators(field, inner)?,
                _ => bail!("$not needs a regex or document"),
            },
            other => return Err(anyhow!("unknown operator: {}", other)),
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn is_operator_block(document: &Document) -> bool {
    document.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn clauses<'a>(operand: &'a Bson, operator: &str) -> Result<Vec<&'a Document>> {
    let Bson::Array(items) = operand else {
        bail!("{} must be an array", operator);
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(anyhow!("{} argument's entries must be objects", operator)),
        })
        .collect()
}

/// Evaluate a query filter against a document
pub fn matches(document: &Document, filter: &Document) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(condition, "$and")? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(condition, "$or")? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(condition, "$nor")? {
                    if matches(document, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            other if other.starts_with('$') => {
                return Err(anyhow!("unknown top level operator: {}", other))
            }
            path => {
                let field = lookup(document, path);
                match condition {
                    Bson::Document(operators) if is_operator_block(operators) => {
                        matches_operators(field, operators)?
                    }
                    literal => field_equals(field, literal),
                }
            }
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Stable multi-key sort following a `{ field: 1 | -1 }` specification
pub fn sort_documents(documents: &mut [Document], sort: &Document) -> Result<()> {
    let mut keys = Vec::with_capacity(sort.len());
    for (path, direction) in sort {
        let descending = match as_f64(direction) {
            Some(d) if d == 1.0 => false,
            Some(d) if d == -1.0 => true,
            _ => bail!("$sort key ordering must be 1 (for ascending) or -1 (for descending)"),
        };
        keys.push((path.as_str(), descending));
    }

    documents.sort_by(|left, right| {
        for (path, descending) in &keys {
            let l = lookup(left, path).unwrap_or(&Bson::Null);
            let r = lookup(right, path).unwrap_or(&Bson::Null);
            let ordering = compare(l, r);
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn vendor() -> Document {
        doc! {
            "name": "Kaveri Staffing",
            "rating": 4.5,
            "workers": 120,
            "skills": ["welding", "electrical"],
            "address": { "city": "Pune", "pin": "411001" },
        }
    }

    #[test]
    fn implicit_equality_and_dotted_paths() {
        let document = vendor();
        assert!(matches(&document, &doc! {"name": "Kaveri Staffing"}).unwrap());
        assert!(matches(&document, &doc! {"address.city": "Pune"}).unwrap());
        assert!(!matches(&document, &doc! {"address.city": "Nashik"}).unwrap());
        assert!(matches(&document, &doc! {}).unwrap());
    }

    #[test]
    fn numeric_comparisons_cross_widths() {
        let document = vendor();
        assert!(matches(&document, &doc! {"workers": {"$gte": 120_i64}}).unwrap());
        assert!(matches(&document, &doc! {"rating": {"$gt": 4, "$lt": 5}}).unwrap());
        assert!(!matches(&document, &doc! {"workers": {"$lt": 100}}).unwrap());
        // strings never compare against numbers
        assert!(!matches(&document, &doc! {"name": {"$gt": 1}}).unwrap());
    }

    #[test]
    fn arrays_match_any_element() {
        let document = vendor();
        assert!(matches(&document, &doc! {"skills": "welding"}).unwrap());
        assert!(matches(&document, &doc! {"skills": {"$in": ["plumbing", "electrical"]}}).unwrap());
        assert!(matches(&document, &doc! {"skills": {"$nin": ["plumbing"]}}).unwrap());
    }

    #[test]
    fn logical_operators() {
        let document = vendor();
        let filter = doc! {"$or": [{"workers": {"$lt": 10}}, {"address.city": "Pune"}]};
        assert!(matches(&document, &filter).unwrap());

        let filter = doc! {"$and": [{"rating": {"$gte": 4}}, {"skills": "carpentry"}]};
        assert!(!matches(&document, &filter).unwrap());

        let filter = doc! {"$nor": [{"name": "Other"}], "rating": {"$not": {"$lt": 4}}};
        assert!(matches(&document, &filter).unwrap());
    }

    #[test]
    fn exists_and_null_semantics() {
        let document = vendor();
        assert!(matches(&document, &doc! {"gst": {"$exists": false}}).unwrap());
        assert!(matches(&document, &doc! {"gst": null}).unwrap());
        assert!(!matches(&document, &doc! {"name": {"$exists": false}}).unwrap());
    }

    #[test]
    fn unknown_operators_are_errors() {
        let document = vendor();
        assert!(matches(&document, &doc! {"name": {"$where": "x"}}).is_err());
        assert!(matches(&document, &doc! {"$expr": {}}).is_err());
    }

    #[test]
    fn sorts_by_multiple_keys() {
        let mut documents = vec![
            doc! {"city": "Pune", "n": 2},
            doc! {"city": "Delhi", "n": 5},
            doc! {"city": "Pune", "n": 9},
            doc! {"n": 1},
        ];
        sort_documents(&mut documents, &doc! {"city": 1, "n": -1}).unwrap();

        let order: Vec<i32> = documents.iter().map(|d| d.get_i32("n").unwrap()).collect();
        // missing city sorts as null, before strings
        assert_eq!(order, vec![1, 5, 9, 2]);

        assert!(sort_documents(&mut documents, &doc! {"n": "up"}).is_err());
    }

    #[test]
    fn assign_creates_nested_documents() {
        let mut document = doc! {};
        assign(&mut document, "stats.total", Bson::Int32(3));
        assert_eq!(document, doc! {"stats": {"total": 3}});
    }
}
