//! Statement templates registered once per pool, and the bound instances callers fill in.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SqlWorkerPoolError;
use crate::types::RowValues;

/// Which side of the pool a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Owned by a worker thread, fed from the operation queue.
    Async,
    /// Borrowed directly by calling threads.
    Sync,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Async => f.write_str("async"),
            ConnectionKind::Sync => f.write_str("sync"),
        }
    }
}

/// Which connections a template gets prepared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFlags {
    Async,
    Sync,
    Both,
}

impl ConnectionFlags {
    #[must_use]
    pub fn allows(self, kind: ConnectionKind) -> bool {
        matches!(
            (self, kind),
            (ConnectionFlags::Both, _)
                | (ConnectionFlags::Async, ConnectionKind::Async)
                | (ConnectionFlags::Sync, ConnectionKind::Sync)
        )
    }
}

/// Immutable parameterised SQL with a fixed number of `?` placeholders.
#[derive(Debug, PartialEq, Eq)]
pub struct StatementTemplate {
    id: u32,
    sql: String,
    param_count: usize,
    flags: ConnectionFlags,
}

impl StatementTemplate {
    #[must_use]
    pub fn new(id: u32, sql: impl Into<String>, flags: ConnectionFlags) -> Self {
        let sql = sql.into();
        let param_count = count_placeholders(&sql);
        Self {
            id,
            sql,
            param_count,
            flags,
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    #[must_use]
    pub fn flags(&self) -> ConnectionFlags {
        self.flags
    }
}

/// Count `?` placeholders outside quoted literals, quoted identifiers and comments.
fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' && q != '`' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '?' => count += 1,
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
            }
            _ => {}
        }
    }
    count
}

/// Pool-wide table of statement templates, keyed by id.
///
/// Filled in before the pool opens and read-only afterwards; every connection of the pool
/// prepares the templates whose flags allow its kind.
#[derive(Debug, Default)]
pub struct StatementRegistry {
    templates: BTreeMap<u32, Arc<StatementTemplate>>,
}

impl StatementRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sql` under `id`.
    ///
    /// # Errors
    /// Returns `ConfigError` if `id` is already taken.
    pub fn register(
        &mut self,
        id: u32,
        sql: impl Into<String>,
        flags: ConnectionFlags,
    ) -> Result<&mut Self, SqlWorkerPoolError> {
        if self.templates.contains_key(&id) {
            return Err(SqlWorkerPoolError::ConfigError(format!(
                "statement id {id} registered twice"
            )));
        }
        self.templates
            .insert(id, Arc::new(StatementTemplate::new(id, sql, flags)));
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Arc<StatementTemplate>> {
        self.templates.get(&id)
    }

    /// Templates prepared on connections of `kind`, in id order.
    pub fn for_kind(&self, kind: ConnectionKind) -> impl Iterator<Item = &Arc<StatementTemplate>> {
        self.templates
            .values()
            .filter(move |template| template.flags().allows(kind))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// A template plus the values for one execution.
///
/// The slot count is fixed by the template. Out-of-range `set` calls and unset slots are
/// reported as `BindingError` when the statement runs.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    template: Arc<StatementTemplate>,
    slots: Vec<Option<RowValues>>,
    overflow: Option<usize>,
}

impl PreparedStatement {
    #[must_use]
    pub fn new(template: Arc<StatementTemplate>) -> Self {
        let slots = vec![None; template.param_count()];
        Self {
            template,
            slots,
            overflow: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.template.id()
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        self.template.sql()
    }

    #[must_use]
    pub fn template(&self) -> &Arc<StatementTemplate> {
        &self.template
    }

    /// Bind `value` to the zero-based placeholder `index`.
    pub fn set(&mut self, index: usize, value: impl Into<RowValues>) -> &mut Self {
        match self.slots.get_mut(index) {
            Some(slot) => *slot = Some(value.into()),
            None => self.overflow = Some(self.overflow.map_or(index, |i| i.max(index))),
        }
        self
    }

    pub fn set_null(&mut self, index: usize) -> &mut Self {
        self.set(index, RowValues::Null)
    }

    /// Bind every placeholder at once, in order.
    #[must_use]
    pub fn with_params(mut self, values: Vec<RowValues>) -> Self {
        if values.len() > self.slots.len() {
            self.overflow = Some(values.len() - 1);
        }
        for (slot, value) in self.slots.iter_mut().zip(values) {
            *slot = Some(value);
        }
        self
    }

    pub fn clear_parameters(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.overflow = None;
    }

    /// The bound values, or a `BindingError` if the binding does not match the template.
    ///
    /// # Errors
    /// Returns `BindingError` when a slot is unset or a value was bound past the last slot.
    pub fn bound_params(&self) -> Result<Vec<RowValues>, SqlWorkerPoolError> {
        if let Some(index) = self.overflow {
            return Err(SqlWorkerPoolError::BindingError(format!(
                "statement {} takes {} parameters, value bound at index {index}",
                self.id(),
                self.slots.len()
            )));
        }
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.clone().ok_or_else(|| {
                    SqlWorkerPoolError::BindingError(format!(
                        "statement {} parameter {index} of {} is not bound",
                        self.id(),
                        self.slots.len()
                    ))
                })
            })
            .collect()
    }
}
