//! Runtime metrics, registered with metriken for exposition.

use metriken::metric;

use crate::counter::{Counter, CounterGroup};

static CONN: CounterGroup = CounterGroup::new();
static RING: CounterGroup = CounterGroup::new();
static LOGQ: CounterGroup = CounterGroup::new();

/// Counter slot indices for connection and session metrics.
mod conn {
    pub const ACCEPTED: usize = 0;
    pub const SESSIONS_SUBMITTED: usize = 1;
    pub const TASKS_COMPLETED: usize = 2;
    pub const HANDLER_PANICS: usize = 3;
}

/// Counter slot indices for reactor metrics.
mod ring {
    pub const CQE_PROCESSED: usize = 0;
    pub const SQE_SUBMIT_FAILURES: usize = 1;
}

/// Counter slot indices for logger metrics.
mod logq {
    pub const RECORDS_DROPPED: usize = 0;
}

#[metric(
    name = "ringherd/connections/accepted",
    description = "Total connections accepted by the listener"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new(&CONN, conn::ACCEPTED);

#[metric(
    name = "ringherd/sessions/submitted",
    description = "Sessions handed to the worker pool"
)]
pub static SESSIONS_SUBMITTED: Counter = Counter::new(&CONN, conn::SESSIONS_SUBMITTED);

#[metric(
    name = "ringherd/tasks/completed",
    description = "Handler tasks driven to completion"
)]
pub static TASKS_COMPLETED: Counter = Counter::new(&CONN, conn::TASKS_COMPLETED);

#[metric(
    name = "ringherd/tasks/panicked",
    description = "Handler tasks that ended in a captured panic"
)]
pub static HANDLER_PANICS: Counter = Counter::new(&CONN, conn::HANDLER_PANICS);

#[metric(
    name = "ringherd/cqe/processed",
    description = "Completion queue entries dispatched"
)]
pub static CQE_PROCESSED: Counter = Counter::new(&RING, ring::CQE_PROCESSED);

#[metric(
    name = "ringherd/sqe/submit_failures",
    description = "Submissions that found the ring full after a flush"
)]
pub static SQE_SUBMIT_FAILURES: Counter = Counter::new(&RING, ring::SQE_SUBMIT_FAILURES);

#[metric(
    name = "ringherd/log/records_dropped",
    description = "Log records dropped because the log queue was full"
)]
pub static LOG_RECORDS_DROPPED: Counter = Counter::new(&LOGQ, logq::RECORDS_DROPPED);
