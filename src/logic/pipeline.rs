use anyhow::{anyhow, bail, Result};
use bson::{Bson, Document};

use crate::logic::document_filter::{assign, compare, lookup, matches, sort_documents, values_equal};

/// Evaluate an expression: `"$path"` reads a field, a document evaluates
/// each value, anything else is a literal.
pub fn evaluate_expression(document: &Document, expression: &Bson) -> Bson {
    match expression {
        Bson::String(text) if text.starts_with('$') => lookup(document, &text[1..])
            .cloned()
            .unwrap_or(Bson::Null),
        Bson::Document(fields) => {
            let mut out = Document::new();
            for (key, value) in fields {
                out.insert(key.clone(), evaluate_expression(document, value));
            }
            Bson::Document(out)
        }
        Bson::Array(items) => Bson::Array(
            items
                .iter()
                .map(|item| evaluate_expression(document, item))
                .collect(),
        ),
        literal => literal.clone(),
    }
}

fn as_count(value: &Bson, stage: &str) -> Result<usize> {
    let count = match value {
        Bson::Int32(v) => *v as i64,
        Bson::Int64(v) => *v,
        Bson::Double(v) if v.fract() == 0.0 => *v as i64,
        _ => bail!("{} stage requires an integer argument", stage),
    };
    usize::try_from(count).map_err(|_| anyhow!("{} stage requires a non-negative argument", stage))
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(v) => *v != 0,
        Bson::Int64(v) => *v != 0,
        Bson::Double(v) => *v != 0.0,
        _ => false,
    }
}

/// Running numeric total that stays integral until a double shows up
#[derive(Default)]
struct NumericSum {
    integer: i64,
    float: f64,
    saw_double: bool,
    samples: usize,
}

impl NumericSum {
    fn add(&mut self, value: &Bson) {
        match value {
            Bson::Int32(v) => self.add_integer(*v as i64),
            Bson::Int64(v) => self.add_integer(*v),
            Bson::Double(v) => {
                self.float += *v;
                self.saw_double = true;
            }
            _ => return,
        }
        self.samples += 1;
    }

    /// Past the `i64` range the total continues as a double
    fn add_integer(&mut self, value: i64) {
        match self.integer.checked_add(value) {
            Some(total) => self.integer = total,
            None => {
                self.float += self.integer as f64 + value as f64;
                self.integer = 0;
                self.saw_double = true;
            }
        }
    }

    fn total(&self) -> Bson {
        if self.saw_double {
            Bson::Double(self.integer as f64 + self.float)
        } else if let Ok(small) = i32::try_from(self.integer) {
            Bson::Int32(small)
        } else {
            Bson::Int64(self.integer)
        }
    }

    fn average(&self) -> Bson {
        if self.samples == 0 {
            return Bson::Null;
        }
        Bson::Double((self.integer as f64 + self.float) / self.samples as f64)
    }
}

enum Accumulator {
    Sum(NumericSum),
    Avg(NumericSum),
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    Last(Bson),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
}

impl Accumulator {
    fn new(operator: &str) -> Result<Self> {
        Ok(match operator {
            "$sum" => Accumulator::Sum(NumericSum::default()),
            "$avg" => Accumulator::Avg(NumericSum::default()),
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            other => bail!("unknown group operator '{}'", other),
        })
    }

    fn add(&mut self, value: Bson) {
        match self {
            Accumulator::Sum(sum) | Accumulator::Avg(sum) => sum.add(&value),
            Accumulator::Min(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().map_or(true, |c| compare(&value, c).is_lt())
                {
                    *current = Some(value);
                }
            }
            Accumulator::Max(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().map_or(true, |c| compare(&value, c).is_gt())
                {
                    *current = Some(value);
                }
            }
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            Accumulator::Last(current) => *current = value,
            Accumulator::Push(items) => items.push(value),
            Accumulator::AddToSet(items) => {
                if !items.iter().any(|item| values_equal(item, &value)) {
                    items.push(value);
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum(sum) => sum.total(),
            Accumulator::Avg(sum) => sum.average(),
            Accumulator::Min(value) | Accumulator::Max(value) | Accumulator::First(value) => {
                value.unwrap_or(Bson::Null)
            }
            Accumulator::Last(value) => value,
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Bson::Array(items),
        }
    }
}

fn group(documents: Vec<Document>, spec: &Document) -> Result<Vec<Document>> {
    let key_expression = spec
        .get("_id")
        .ok_or_else(|| anyhow!("a group specification must include an _id"))?;

    let mut fields = Vec::new();
    for (name, definition) in spec.iter().filter(|(name, _)| name.as_str() != "_id") {
        let Bson::Document(definition) = definition else {
            bail!("the field '{}' must be an accumulator object", name);
        };
        let Some((operator, argument)) = definition.iter().next() else {
            bail!("the field '{}' must specify one accumulator", name);
        };
        Accumulator::new(operator)?;
        fields.push((name.clone(), operator.clone(), argument.clone()));
    }

    // Groups keep first-seen order
    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for document in &documents {
        let key = evaluate_expression(document, key_expression);
        let position = match groups.iter().position(|(existing, _)| values_equal(existing, &key)) {
            Some(position) => position,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(_, operator, _)| Accumulator::new(operator))
                    .collect::<Result<Vec<_>>>()?;
                groups.push((key, accumulators));
                groups.len() - 1
            }
        };

        for ((_, _, argument), accumulator) in fields.iter().zip(groups[position].1.iter_mut()) {
            accumulator.add(evaluate_expression(document, argument));
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut out = Document::new();
            out.insert("_id", key);
            for ((name, _, _), accumulator) in fields.iter().zip(accumulators) {
                out.insert(name.clone(), accumulator.finish());
            }
            out
        })
        .collect())
}

fn is_flag(value: &Bson) -> bool {
    matches!(value, Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn project(documents: Vec<Document>, spec: &Document) -> Result<Vec<Document>> {
    let exclusion = spec
        .iter()
        .filter(|(name, value)| name.as_str() != "_id" && is_flag(value))
        .all(|(_, value)| !is_truthy(value))
        && spec.iter().all(|(_, value)| is_flag(value));

    let mut projected = Vec::with_capacity(documents.len());
    for document in documents {
        if exclusion {
            let mut out = document;
            for (path, _) in spec {
                out.remove(path);
            }
            projected.push(out);
            continue;
        }

        let mut out = Document::new();
        let keep_id = spec.get("_id").map_or(true, is_truthy);
        if keep_id {
            if let Some(id) = document.get("_id") {
                out.insert("_id", id.clone());
            }
        }
        for (path, value) in spec.iter().filter(|(path, _)| path.as_str() != "_id") {
            if is_flag(value) {
                if !is_truthy(value) {
                    bail!("cannot do exclusion on field {} in inclusion projection", path);
                }
                if let Some(found) = lookup(&document, path) {
                    assign(&mut out, path, found.clone());
                }
            } else {
                assign(&mut out, path, evaluate_expression(&document, value));
            }
        }
        projected.push(out);
    }
    Ok(projected)
}

fn unwind(documents: Vec<Document>, argument: &Bson) -> Result<Vec<Document>> {
    let path = match argument {
        Bson::String(path) => path.as_str(),
        Bson::Document(options) => options
            .get_str("path")
            .map_err(|_| anyhow!("no path specified to $unwind stage"))?,
        _ => bail!("expected either a string or an object as specification for $unwind stage"),
    };
    let Some(field) = path.strip_prefix('$') else {
        bail!("path option to $unwind stage should be prefixed with a '$': {}", path);
    };

    let mut unwound = Vec::new();
    for document in documents {
        match lookup(&document, field).cloned() {
            Some(Bson::Array(items)) => {
                for item in items {
                    let mut copy = document.clone();
                    assign(&mut copy, field, item);
                    unwound.push(copy);
                }
            }
            Some(Bson::Null) | None => {}
            Some(_) => unwound.push(document),
        }
    }
    Ok(unwound)
}

fn stage_document<'a>(value: &'a Bson, stage: &str) -> Result<&'a Document> {
    match value {
        Bson::Document(document) => Ok(document),
        _ => Err(anyhow!("the {} stage specification must be an object", stage)),
    }
}

/// Run an aggregation pipeline over an in-memory collection
pub fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> Result<Vec<Document>> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, argument)), None) = (entries.next(), entries.next()) else {
            bail!("A pipeline stage specification object must contain exactly one field.");
        };

        documents = match name.as_str() {
            "$match" => {
                let filter = stage_document(argument, name)?;
                let mut kept = Vec::with_capacity(documents.len());
                for document in documents {
                    if matches(&document, filter)? {
                        kept.push(document);
                    }
                }
                kept
            }
            "$group" => group(documents, stage_document(argument, name)?)?,
            "$project" => project(documents, stage_document(argument, name)?)?,
            "$addFields" | "$set" => {
                let fields = stage_document(argument, name)?;
                documents
                    .into_iter()
                    .map(|mut document| {
                        for (path, expression) in fields {
                            let value = evaluate_expression(&document, expression);
                            assign(&mut document, path, value);
                        }
                        document
                    })
                    .collect()
            }
            "$sort" => {
                sort_documents(&mut documents, stage_document(argument, name)?)?;
                documents
            }
            "$skip" => documents.into_iter().skip(as_count(argument, name)?).collect(),
            "$limit" => {
                let limit = as_count(argument, name)?;
                if limit == 0 {
                    bail!("the limit must be positive");
                }
                documents.into_iter().take(limit).collect()
            }
            "$count" => {
                let Bson::String(field) = argument else {
                    bail!("the count field must be a non-empty string");
                };
                if documents.is_empty() {
                    Vec::new()
                } else {
                    let total = i32::try_from(documents.len())
                        .map(Bson::Int32)
                        .unwrap_or(Bson::Int64(documents.len() as i64));
                    let mut out = Document::new();
                    out.insert(field.clone(), total);
                    vec![out]
                }
            }
            "$unwind" => unwind(documents, argument)?,
            other => bail!("Unrecognized pipeline stage name: '{}'", other),
        };
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn orders() -> Vec<Document> {
        vec![
            doc! {"_id": 1, "status": "open", "amount": 100, "tags": ["urgent", "bulk"]},
            doc! {"_id": 2, "status": "closed", "amount": 250},
            doc! {"_id": 3, "status": "open", "amount": 50, "tags": ["bulk"]},
            doc! {"_id": 4, "status": "cancelled", "amount": 75.5},
        ]
    }

    #[test]
    fn groups_by_field_with_counts() {
        let pipeline = vec![doc! {"$group": {"_id": "$status", "n": {"$sum": 1}}}];
        let results = run_pipeline(orders(), &pipeline).unwrap();

        assert_eq!(
            results,
            vec![
                doc! {"_id": "open", "n": 2},
                doc! {"_id": "closed", "n": 1},
                doc! {"_id": "cancelled", "n": 1},
            ]
        );
    }

    #[test]
    fn accumulators_cover_common_operators() {
        let pipeline = vec![doc! {"$group": {
            "_id": null,
            "total": {"$sum": "$amount"},
            "avg": {"$avg": "$amount"},
            "min": {"$min": "$amount"},
            "max": {"$max": "$amount"},
            "first": {"$first": "$status"},
            "statuses": {"$addToSet": "$status"},
        }}];
        let results = run_pipeline(orders(), &pipeline).unwrap();
        let summary = &results[0];

        assert_eq!(summary.get_f64("total").unwrap(), 475.5);
        assert_eq!(summary.get_f64("avg").unwrap(), 475.5 / 4.0);
        assert_eq!(summary.get_i32("min").unwrap(), 50);
        assert_eq!(summary.get_i32("max").unwrap(), 250);
        assert_eq!(summary.get_str("first").unwrap(), "open");
        assert_eq!(summary.get_array("statuses").unwrap().len(), 3);
    }

    #[test]
    fn integer_sum_overflow_becomes_double() {
        let documents = vec![doc! {"a": i64::MAX}, doc! {"a": 1_i64}];
        let pipeline = vec![doc! {"$group": {
            "_id": Bson::Null,
            "s": {"$sum": "$a"},
            "avg": {"$avg": "$a"},
        }}];

        let results = run_pipeline(documents, &pipeline).unwrap();
        let total = results[0].get_f64("s").unwrap();
        assert_eq!(total, i64::MAX as f64 + 1.0);
        assert_eq!(results[0].get_f64("avg").unwrap(), total / 2.0);
    }

    #[test]
    fn match_sort_skip_limit_in_order() {
        let pipeline = vec![
            doc! {"$match": {"amount": {"$gte": 60}}},
            doc! {"$sort": {"amount": -1}},
            doc! {"$skip": 1},
            doc! {"$limit": 1},
            doc! {"$project": {"_id": 0, "amount": 1}},
        ];
        let results = run_pipeline(orders(), &pipeline).unwrap();
        assert_eq!(results, vec![doc! {"amount": 100}]);
    }

    #[test]
    fn unwind_then_count() {
        let pipeline = vec![doc! {"$unwind": "$tags"}, doc! {"$count": "tagged"}];
        let results = run_pipeline(orders(), &pipeline).unwrap();
        assert_eq!(results, vec![doc! {"tagged": 3}]);
    }

    #[test]
    fn exclusion_projection_and_add_fields() {
        let pipeline = vec![
            doc! {"$match": {"_id": 2}},
            doc! {"$addFields": {"meta.source": "admin", "copy": "$amount"}},
            doc! {"$project": {"_id": 0, "status": 0}},
        ];
        let results = run_pipeline(orders(), &pipeline).unwrap();
        assert_eq!(results, vec![doc! {"amount": 250, "meta": {"source": "admin"}, "copy": 250}]);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let err = run_pipeline(orders(), &[doc! {"$lookup": {}}]).unwrap_err();
        assert!(err.to_string().contains("Unrecognized pipeline stage name"));

        let err = run_pipeline(orders(), &[doc! {"$match": {}, "$limit": 1}]).unwrap_err();
        assert!(err.to_string().contains("exactly one field"));
    }
}
