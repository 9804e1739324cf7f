//! Query results: the materialised [`ResultSet`] a driver hands back, and the forward-only
//! [`QueryResult`] cursor callers read it through.

pub mod cursor;
pub mod result_set;

pub use cursor::QueryResult;
pub use result_set::ResultSet;
