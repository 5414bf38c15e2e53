//! Database dispatch macros for reducing code duplication.
//!
//! sqlx exposes one concrete connection type per engine. These macros generate
//! the per-engine match arms so every operation on a [`DbConnection`] stays a
//! single readable expression.
//!
//! [`DbConnection`]: crate::db::sqlx_dialect::DbConnection

/// Macro for generating database dispatch match arms.
///
/// This macro generates match arms for `DbConnection` variants, reducing the need
/// to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(conn, {
///     MySql(c) => do_mysql(c),
///     Postgres(c) => do_postgres(c),
///     SQLite(c) => do_sqlite(c),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::sqlx_dialect::DbConnection::$variant($c) => $body,
            )+
        }
    };
}

/// Same body for every engine.
///
/// Works because sqlx's query builders are generic over the executor, so the
/// expression type-checks separately inside each arm.
#[macro_export]
macro_rules! db_dispatch_all {
    ($conn:expr, |$c:ident| $body:expr) => {
        $crate::impl_db_dispatch!($conn, {
            MySql($c) => $body,
            Postgres($c) => $body,
            SQLite($c) => $body,
        })
    };
}

pub use db_dispatch_all;
pub use impl_db_dispatch;
