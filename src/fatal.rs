use crate::error::SqlWorkerPoolError;

/// Exit status used when the database layer takes the process down.
pub const FATAL_EXIT_CODE: i32 = 1;

/// Receives errors whose only safe answer is shutting the process down.
///
/// The pool reports each fatal event here exactly once: synchronous calls report before
/// returning the error, worker threads report after the failed operation. Library code
/// never exits on its own.
pub trait FatalHandler: Send + Sync {
    fn on_fatal(&self, error: &SqlWorkerPoolError);
}

/// Default handler: log and exit with [`FATAL_EXIT_CODE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitProcess;

impl FatalHandler for ExitProcess {
    fn on_fatal(&self, error: &SqlWorkerPoolError) {
        tracing::error!(%error, "unrecoverable database failure, shutting down");
        std::process::exit(FATAL_EXIT_CODE);
    }
}

impl<F> FatalHandler for F
where
    F: Fn(&SqlWorkerPoolError) + Send + Sync,
{
    fn on_fatal(&self, error: &SqlWorkerPoolError) {
        self(error);
    }
}
