//! Query translation from kale's filter AST to MongoDB query syntax.

use bson::{Bson, Document, doc};

use kale_core::{
    container::ID_KEY,
    error::KaleError,
    query::{Expr, FieldOp, QueryVisitor},
};

/// Translates filter expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// Translates an optional filter; `None` selects every document.
    pub fn translate(filter: Option<&Expr>) -> Result<Document, KaleError> {
        match filter {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(doc! {}),
        }
    }
}

/// Escapes regular expression metacharacters so `text` matches literally.
fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn string_operand<'a>(op: &str, value: &'a Bson) -> Result<&'a str, KaleError> {
    match value {
        Bson::String(s) => Ok(s),
        _ => Err(KaleError::Backend(format!("{op} operator requires a string value"))),
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = KaleError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! {});
        }

        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            // Every stored document has an identifier, so this matches nothing.
            return Ok(doc! { ID_KEY: { "$exists": false } });
        }

        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(s) },
                    Bson::Array(arr) => doc! { "$all": arr },
                    other => doc! { "$elemMatch": { "$eq": other } },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape_regex(s) } },
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$ne": other },
                },
                FieldOp::StartsWith => {
                    doc! { "$regex": format!("^{}", escape_regex(string_operand("StartsWith", value)?)) }
                }
                FieldOp::EndsWith => {
                    doc! { "$regex": format!("{}$", escape_regex(string_operand("EndsWith", value)?)) }
                }
                FieldOp::AnyOf => match value {
                    Bson::Array(_) => doc! { "$in": value },
                    other => doc! { "$in": [other] },
                },
                FieldOp::NoneOf => match value {
                    Bson::Array(_) => doc! { "$nin": value },
                    other => doc! { "$nin": [other] },
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kale_core::query::Filter;

    fn translate(expr: Expr) -> Document {
        MongoQueryTranslator::translate(Some(&expr)).unwrap()
    }

    #[test]
    fn empty_filters() {
        assert_eq!(MongoQueryTranslator::translate(None).unwrap(), doc! {});
        assert_eq!(translate(Filter::all()), doc! {});
        assert_eq!(translate(Filter::or(Vec::new())), doc! { "_id": { "$exists": false } });
    }

    #[test]
    fn comparisons_and_combinators() {
        let expr = Filter::eq("address.city", "Montreal").and(Filter::gt("age", 18));

        assert_eq!(
            translate(expr),
            doc! { "$and": [
                { "address.city": { "$eq": "Montreal" } },
                { "age": { "$gt": 18 } },
            ] }
        );
        assert_eq!(
            translate(Filter::exists("a").not()),
            doc! { "$nor": [{ "a": { "$exists": true } }] }
        );
    }

    #[test]
    fn string_operators_match_literally() {
        assert_eq!(
            translate(Filter::starts_with("name", "a.b")),
            doc! { "name": { "$regex": "^a\\.b" } }
        );
        assert!(MongoQueryTranslator::translate(Some(&Filter::ends_with("n", 1))).is_err());
    }

    #[test]
    fn any_of_accepts_a_single_value() {
        assert_eq!(translate(Filter::any_of("n", 1)), doc! { "n": { "$in": [1] } });
    }
}
