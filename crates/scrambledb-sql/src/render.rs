//! Generic SQL text rendering
//!
//! Renders statement objects into a generic dialect; backend-specific
//! spellings belong to the driver layer. Rendering an unresolved placeholder
//! is a structural error rather than a silent omission, since a dropped
//! subquery would change query semantics.

use crate::expr::{BinaryOperator, Expr, Literal};
use crate::query::{Relation, SelectQuery, TableRef};
use crate::statement::SqlStatement;
use scrambledb_common::{Result, ScrambleDbError};

pub fn render_statement(statement: &SqlStatement) -> Result<String> {
    match statement {
        SqlStatement::Query(query) => render_select(query),
        SqlStatement::CreateTableAsSelect { target, query } => Ok(format!(
            "create table {} as {}",
            render_table(target),
            render_select(query)?
        )),
        SqlStatement::DropTable { target, if_exists } => {
            if *if_exists {
                Ok(format!("drop table if exists {}", render_table(target)))
            } else {
                Ok(format!("drop table {}", render_table(target)))
            }
        }
    }
}

pub fn render_select(query: &SelectQuery) -> Result<String> {
    if query.select.is_empty() {
        return Err(ScrambleDbError::Structural(
            "select list is empty".to_string(),
        ));
    }
    if query.from.is_empty() {
        return Err(ScrambleDbError::Structural(
            "from clause is empty".to_string(),
        ));
    }

    let select = query
        .select
        .iter()
        .map(render_expr)
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let from = query
        .from
        .iter()
        .map(render_relation)
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut sql = format!("select {select} from {from}");
    if let Some(predicate) = &query.predicate {
        sql.push_str(&format!(" where {}", render_expr(predicate)?));
    }
    if !query.group_by.is_empty() {
        let group_by = query
            .group_by
            .iter()
            .map(render_expr)
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        sql.push_str(&format!(" group by {group_by}"));
    }
    Ok(sql)
}

fn render_table(table: &TableRef) -> String {
    table.to_string()
}

fn render_relation(relation: &Relation) -> Result<String> {
    match relation {
        Relation::Table { table, alias } => Ok(match alias {
            Some(alias) => format!("{} {}", render_table(table), alias),
            None => render_table(table),
        }),
        Relation::DerivedTable { query, alias } => {
            Ok(format!("({}) {}", render_select(query)?, alias))
        }
        Relation::Placeholder { id, .. } => Err(ScrambleDbError::Structural(format!(
            "unresolved {id} in from clause"
        ))),
        Relation::Join { left, right, on } => Ok(format!(
            "{} inner join {} on {}",
            render_relation(left)?,
            render_relation(right)?,
            render_expr(on)?
        )),
    }
}

pub fn render_expr(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Column(name) => Ok(name.clone()),
        Expr::QualifiedColumn { table, name } => Ok(format!("{table}.{name}")),
        Expr::Star(None) => Ok("*".to_string()),
        Expr::Star(Some(table)) => Ok(format!("{table}.*")),
        Expr::Literal(literal) => Ok(render_literal(literal)),
        Expr::BinaryOp { left, right, op } => Ok(format!(
            "({} {} {})",
            render_expr(left)?,
            operator_text(*op),
            render_expr(right)?
        )),
        Expr::Function { name, args } => {
            let args = args
                .iter()
                .map(render_expr)
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            Ok(format!("{name}({args})"))
        }
        Expr::Alias { expr, name } => Ok(format!("{} as {}", render_expr(expr)?, name)),
        Expr::Case {
            branches,
            else_expr,
        } => {
            let mut sql = "case".to_string();
            for (condition, value) in branches {
                sql.push_str(&format!(
                    " when {} then {}",
                    render_expr(condition)?,
                    render_expr(value)?
                ));
            }
            sql.push_str(&format!(" else {} end", render_expr(else_expr)?));
            Ok(sql)
        }
        Expr::Subquery(query) => Ok(format!("({})", render_select(query)?)),
        Expr::Placeholder(id) => Err(ScrambleDbError::Structural(format!(
            "unresolved {id} in expression"
        ))),
    }
}

fn render_literal(literal: &Literal) -> String {
    match literal {
        Literal::Null => "null".to_string(),
        Literal::Bool(value) => value.to_string(),
        Literal::Int(value) => value.to_string(),
        Literal::Float(value) => value.to_string(),
        Literal::String(value) => format!("'{}'", value.replace('\'', "''")),
    }
}

fn operator_text(op: BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::Eq => "=",
        BinaryOperator::Neq => "<>",
        BinaryOperator::Lt => "<",
        BinaryOperator::Lte => "<=",
        BinaryOperator::Gt => ">",
        BinaryOperator::Gte => ">=",
        BinaryOperator::And => "and",
        BinaryOperator::Or => "or",
        BinaryOperator::Plus => "+",
        BinaryOperator::Minus => "-",
        BinaryOperator::Multiply => "*",
        BinaryOperator::Divide => "/",
        BinaryOperator::Modulo => "%",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::PlaceholderId;

    #[test]
    fn test_render_count_probe() {
        let query = SelectQuery::count_star(&TableRef::new("myschema", "mytable"));
        assert_eq!(
            render_select(&query).unwrap(),
            "select count(*) from myschema.mytable"
        );
    }

    #[test]
    fn test_render_zero_row_probe() {
        let query = SelectQuery::zero_row_probe(&TableRef::bare("t"));
        assert_eq!(render_select(&query).unwrap(), "select * from t where (1 = 0)");
    }

    #[test]
    fn test_render_ctas() {
        let statement = SqlStatement::create_table_as_select(
            TableRef::new("s", "copy"),
            SelectQuery::star_from(&TableRef::new("s", "orig")),
        );
        assert_eq!(
            render_statement(&statement).unwrap(),
            "create table s.copy as select * from s.orig"
        );
    }

    #[test]
    fn test_render_case() {
        let expr = Expr::Case {
            branches: vec![(
                Expr::col("u").lt(Expr::float(0.5)),
                Expr::int(0),
            )],
            else_expr: Box::new(Expr::int(1)),
        };
        assert_eq!(
            render_expr(&expr).unwrap(),
            "case when (u < 0.5) then 0 else 1 end"
        );
    }

    #[test]
    fn test_render_string_escaping() {
        let expr = Expr::string("o'clock");
        assert_eq!(render_expr(&expr).unwrap(), "'o''clock'");
    }

    #[test]
    fn test_unresolved_placeholder_is_an_error() {
        let query = SelectQuery::new(
            vec![Expr::Placeholder(PlaceholderId(3))],
            vec![Relation::table(TableRef::bare("t"))],
        );
        assert!(matches!(
            render_select(&query),
            Err(ScrambleDbError::Structural(_))
        ));
    }

    #[test]
    fn test_render_join() {
        let relation = Relation::join(
            Relation::aliased_table(TableRef::bare("a"), "x"),
            Relation::aliased_table(TableRef::bare("b"), "y"),
            Expr::qualified("x", "k").equals(Expr::qualified("y", "k")),
        );
        let query = SelectQuery::new(vec![Expr::Star(Some("x".to_string()))], vec![relation]);
        assert_eq!(
            render_select(&query).unwrap(),
            "select x.* from a x inner join b y on (x.k = y.k)"
        );
    }
}
