mod consistency;
mod dead_letter;
mod ingest;
mod reconcile;

pub use consistency::{ConsistencyWorker, RetryPolicy, WorkerReport};
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use ingest::{EnqueueError, IngestQueue, IngestReceiver, ingest_channel};
pub use reconcile::{LikeReconciler, ReconcileError, ReconcilePolicy, ReconcileReport};
