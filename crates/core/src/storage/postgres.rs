use anyhow::Context;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::stock::{Stock, StockRating};
use crate::query::fields::Column;
use crate::query::predicate::{Operand, Predicate, ScalarOp, SetOp};
use crate::query::{PageQuery, SortOrder};
use crate::storage::StockRepository;

const SELECT_STOCKS: &str = "SELECT id, created_at, updated_at, ticker, target_from, target_to, \
     company, action, brokerage, rating_from, rating_to, time, classifications \
     FROM stocks WHERE deleted_at IS NULL";

const RETURNING_STOCK: &str = " RETURNING id, created_at, updated_at, ticker, target_from, \
     target_to, company, action, brokerage, rating_from, rating_to, time, classifications";

/// Rows per INSERT statement (10 binds each, well under the 65535 bind limit).
const INSERT_CHUNK: usize = 500;

#[derive(Debug, Clone)]
pub struct PgStockRepository {
    pool: PgPool,
}

impl PgStockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl StockRepository for PgStockRepository {
    async fn create(&self, rating: &StockRating) -> anyhow::Result<Stock> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO stocks (ticker, target_from, target_to, company, action, brokerage, \
             rating_from, rating_to, time, classifications) ",
        );
        qb.push_values(std::iter::once(rating), push_rating);
        qb.push(RETURNING_STOCK);

        qb.build_query_as::<Stock>()
            .fetch_one(&self.pool)
            .await
            .context("insert stocks failed")
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE stocks SET deleted_at = now(), updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("soft delete stocks failed (id={id})"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn find(&self, page: &PageQuery, predicates: &[Predicate]) -> anyhow::Result<Vec<Stock>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_STOCKS);
        push_predicates(&mut qb, predicates);
        push_page(&mut qb, page);

        qb.build_query_as::<Stock>()
            .fetch_all(&self.pool)
            .await
            .context("select stocks failed")
    }

    async fn find_by_ticker(&self, ticker: &str) -> anyhow::Result<Option<Stock>> {
        let sql = format!("{SELECT_STOCKS} AND ticker = $1 ORDER BY time DESC, id DESC LIMIT 1");
        sqlx::query_as::<_, Stock>(&sql)
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("select stock by ticker failed (ticker={ticker})"))
    }

    async fn find_by_label(&self, label: &str) -> anyhow::Result<Vec<Stock>> {
        let sql = format!("{SELECT_STOCKS} AND classifications @> $1 ORDER BY time DESC, id ASC");
        sqlx::query_as::<_, Stock>(&sql)
            .bind(vec![label.to_string()])
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("select stocks by label failed (label={label})"))
    }

    async fn save_batch(&self, ratings: &[StockRating]) -> anyhow::Result<u64> {
        if ratings.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        let mut affected: u64 = 0;

        for (batch_idx, chunk) in ratings.chunks(INSERT_CHUNK).enumerate() {
            let t0 = std::time::Instant::now();
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO stocks (ticker, target_from, target_to, company, action, brokerage, \
                 rating_from, rating_to, time, classifications) ",
            );
            qb.push_values(chunk, push_rating);

            let res = qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("batch insert stocks failed")?;
            affected += res.rows_affected();

            tracing::debug!(
                batch_idx,
                batch_size = chunk.len(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "stocks batch insert"
            );
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(affected)
    }

    async fn count(&self, predicates: &[Predicate]) -> anyhow::Result<i64> {
        let mut qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM stocks WHERE deleted_at IS NULL");
        push_predicates(&mut qb, predicates);

        let (count,): (i64,) = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .context("count stocks failed")?;
        Ok(count)
    }
}

fn push_rating(mut b: sqlx::query_builder::Separated<'_, '_, Postgres, &'static str>, r: &StockRating) {
    b.push_bind(r.ticker.trim().to_string())
        .push_bind(r.target_from.clone())
        .push_bind(r.target_to.clone())
        .push_bind(r.company.clone())
        .push_bind(r.action.clone())
        .push_bind(r.brokerage.clone())
        .push_bind(r.rating_from.clone())
        .push_bind(r.rating_to.clone())
        .push_bind(r.time)
        .push_bind(r.stored_labels());
}

/// Appends ` AND <predicate>` for each predicate. Column names come from
/// [`Column::name`], never from client input.
pub(crate) fn push_predicates(qb: &mut QueryBuilder<'_, Postgres>, predicates: &[Predicate]) {
    for p in predicates {
        qb.push(" AND ");
        push_predicate(qb, p);
    }
}

fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, predicate: &Predicate) {
    match predicate {
        Predicate::Scalar {
            column,
            op,
            operand,
        } => push_scalar(qb, *column, *op, operand),
        Predicate::Labels { op, values } => {
            let (positive, negated) = op.split();
            if negated {
                qb.push("NOT ");
            }
            let col = Column::Classifications.name();
            match positive {
                SetOp::Equals => {
                    qb.push(format!("({col} @> "));
                    qb.push_bind(values.clone());
                    qb.push(format!(" AND {col} <@ "));
                    qb.push_bind(values.clone());
                    qb.push(")");
                }
                SetOp::Contains => {
                    qb.push(format!("({col} @> "));
                    qb.push_bind(values.clone());
                    qb.push(")");
                }
                SetOp::Contained => {
                    qb.push(format!("({col} <@ "));
                    qb.push_bind(values.clone());
                    qb.push(")");
                }
                _ => {
                    qb.push(format!("({col} && "));
                    qb.push_bind(values.clone());
                    qb.push(")");
                }
            }
        }
    }
}

fn push_scalar(qb: &mut QueryBuilder<'_, Postgres>, column: Column, op: ScalarOp, operand: &Operand) {
    let col = column.name();
    let pattern = |text: &str| match op {
        ScalarOp::Contains => format!("%{}%", escape_like(text)),
        ScalarOp::StartsWith => format!("{}%", escape_like(text)),
        _ => format!("%{}", escape_like(text)),
    };

    match (op, operand) {
        (ScalarOp::Contains | ScalarOp::StartsWith | ScalarOp::EndsWith, Operand::Text(text)) => {
            qb.push(format!("CAST({col} AS TEXT) LIKE "));
            qb.push_bind(pattern(text));
        }
        (ScalarOp::Equals | ScalarOp::GreaterThan | ScalarOp::LessThan, operand) => {
            let sql_op = match op {
                ScalarOp::Equals => "=",
                ScalarOp::GreaterThan => ">",
                _ => "<",
            };
            qb.push(format!("{col} {sql_op} "));
            match operand {
                Operand::Integer(v) => qb.push_bind(*v),
                Operand::Text(v) => qb.push_bind(v.clone()),
                Operand::Timestamp(v) => qb.push_bind(*v),
            };
        }
        // Pattern ops are always built with a text operand.
        _ => {
            qb.push("FALSE");
        }
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: &PageQuery) {
    let dir = match page.sort.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    qb.push(format!(" ORDER BY {} {dir}, id ASC", page.sort.column.name()));
    qb.push(" LIMIT ");
    qb.push_bind(page.limit);
    qb.push(" OFFSET ");
    qb.push_bind(page.offset);
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortSpec;

    fn sql_for(predicates: &[Predicate]) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM stocks WHERE deleted_at IS NULL");
        push_predicates(&mut qb, predicates);
        qb.sql().to_string()
    }

    #[test]
    fn renders_set_predicates() {
        let overlap = Predicate::Labels {
            op: SetOp::Overlap,
            values: vec!["Tech".into()],
        };
        let not_overlap = Predicate::Labels {
            op: SetOp::NotOverlap,
            values: vec!["Tech".into()],
        };
        assert_eq!(
            sql_for(&[overlap]),
            "SELECT 1 FROM stocks WHERE deleted_at IS NULL AND (classifications && $1)"
        );
        assert_eq!(
            sql_for(&[not_overlap]),
            "SELECT 1 FROM stocks WHERE deleted_at IS NULL AND NOT (classifications && $1)"
        );

        let equals = Predicate::Labels {
            op: SetOp::Equals,
            values: vec!["Tech".into()],
        };
        assert!(sql_for(&[equals]).ends_with("(classifications @> $1 AND classifications <@ $2)"));
    }

    #[test]
    fn renders_scalar_predicates() {
        let preds = vec![
            Predicate::Scalar {
                column: Column::Ticker,
                op: ScalarOp::StartsWith,
                operand: Operand::Text("AA".into()),
            },
            Predicate::Scalar {
                column: Column::Id,
                op: ScalarOp::GreaterThan,
                operand: Operand::Integer(10),
            },
        ];
        assert!(sql_for(&preds)
            .ends_with("AND CAST(ticker AS TEXT) LIKE $1 AND id > $2"));
    }

    #[test]
    fn renders_page_clause() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1");
        push_page(&mut qb, &PageQuery::new(SortSpec::default(), 2, 10));
        assert_eq!(qb.sql(), "SELECT 1 ORDER BY time DESC, id ASC LIMIT $1 OFFSET $2");
    }

    #[test]
    fn escapes_like_metacharacters() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
