//! The high-level [`Event`] type yielded by the [`crate::Reader`].

/// The scheduling context in effect just before an event (spec.md §3,
/// glossary "Sched-ctx"): the (thread, proc, goroutine) triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedCtx {
    /// The thread this event occurred on.
    pub thread: Option<u64>,
    /// The proc bound to that thread at the time.
    pub proc: Option<u64>,
    /// The goroutine running on that thread at the time.
    pub goroutine: Option<u64>,
}

/// Which kind of resource a [`StateTransition`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A goroutine.
    Goroutine,
    /// A logical processor.
    Proc,
}

/// A resource's state, spanning both goroutine and proc state spaces
/// (spec.md §3 "Resource states"). Not every variant is reachable by
/// every [`ResourceKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// State unknown; only valid before the first Sync.
    Undetermined,
    /// The resource has not been created, or has been destroyed.
    NotExist,
    /// Runnable but not currently running (goroutine only).
    Runnable,
    /// Currently running.
    Running,
    /// Blocked (goroutine only).
    Waiting,
    /// Blocked in a syscall.
    Syscall,
    /// In a syscall that the runtime itself issued.
    SyscallRuntime,
    /// Idle (proc only).
    Idle,
    /// Blocked in a syscall with no goroutine bound (proc only).
    SyscallBlocked,
}

/// A single state-machine transition (spec.md §4.5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    /// Which kind of resource transitioned.
    pub resource: ResourceKind,
    /// The resource's id.
    pub id: u64,
    /// The state it was in immediately beforehand.
    pub from: ResourceState,
    /// The state it is in now.
    pub to: ResourceState,
    /// Canonical reason string, for transitions that carry one (e.g.
    /// `GoStop`/`GoBlock`/STW reason codes, spec.md §6.1).
    pub reason: Option<&'static str>,
}

/// A scalar metric sample (`HeapAlloc`, `HeapGoal`, `ProcsChange`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    /// The metric's name.
    pub name: &'static str,
    /// The sampled value.
    pub value: u64,
}

/// A goroutine label assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    /// The goroutine being labeled.
    pub goroutine: u64,
    /// String-table id of the label text.
    pub label_string_id: u64,
}

/// The scope a named range (GC/STW/Sweep/MarkAssist) is opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeScope {
    /// Global, not tied to any one goroutine (GC ranges).
    None,
    /// Tied to a specific goroutine (STW, sweep, mark-assist).
    Goroutine(u64),
}

/// A named range begin/end (spec.md §4.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Where the range is scoped.
    pub scope: RangeScope,
    /// The range's name (`"stw"`, `"gc"`, `"sweep"`, `"mark-assist"`).
    pub name: &'static str,
    /// The canonical reason string (spec.md §6.1), when the wire event
    /// carries a reason code. Only `"stw"` ranges do today; other range
    /// kinds' extra argument isn't a reason code, so this is `None`.
    pub reason: Option<&'static str>,
}

/// A user task begin/end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    /// The task's id.
    pub id: u64,
    /// String-table id of the task's name (only present on Begin).
    pub name_string_id: Option<u64>,
    /// The parent task's id, if any (only present on Begin).
    pub parent_id: Option<u64>,
}

/// A user region begin/end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// The enclosing task, if any.
    pub task_id: Option<u64>,
    /// String-table id of the region's name.
    pub name_string_id: u64,
}

/// A user log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    /// The enclosing task, if any.
    pub task_id: Option<u64>,
    /// String-table id of the log category.
    pub category_string_id: u64,
    /// The raw log message bytes.
    pub message: Vec<u8>,
}

/// A CPU profiling sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSample;

/// The kind-specific payload of an [`Event`] (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Synthetic boundary marker emitted at each generation transition.
    Sync,
    /// A scalar metric sample.
    Metric(Metric),
    /// A goroutine label assignment.
    Label(Label),
    /// A CPU profiling sample.
    StackSample(StackSample),
    /// A named range opening.
    RangeBegin(Range),
    /// A named range closing.
    RangeEnd(Range),
    /// A user task beginning.
    TaskBegin(Task),
    /// A user task ending.
    TaskEnd(Task),
    /// A user region beginning.
    RegionBegin(Region),
    /// A user region ending.
    RegionEnd(Region),
    /// A user log record.
    Log(Log),
    /// A resource's state-machine transition.
    StateTransition(StateTransition),
}

/// A non-fatal anomaly tolerated on an event rather than raised as an
/// error (spec.md §7 "Tolerated anomalies", §4.5.1 UserTaskEnd/UserLog).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// The event referenced a resource not yet introduced.
    UnknownResource,
    /// A stack id referenced had no entry in the generation's stack
    /// table; resolved to an empty stack (spec.md §8 S6).
    MissingStack,
}

/// One fully validated, ordered trace event.
///
/// Borrows nothing itself (strings/stacks are resolved through the
/// generation's tables via `stack_id`/string ids carried in `kind`), but
/// is only meaningful while the generation it was produced from is
/// still the reader's current one (spec.md §5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Monotonic nanosecond timestamp, strictly increasing across the
    /// emitted stream (spec.md §4.5.3).
    pub timestamp: u64,
    /// The kind-specific payload.
    pub kind: EventKind,
    /// The scheduling context just before this event.
    pub sched_ctx: SchedCtx,
    /// The wire opcode this event was decoded from, if any (Sync events
    /// are synthetic and carry `None`).
    pub raw_type: Option<u8>,
    /// Stack id, if this event carries one.
    pub stack_id: Option<u64>,
    /// A tolerated anomaly, if one was detected while validating this
    /// event.
    pub anomaly: Option<Anomaly>,
}

impl Event {
    /// This event's kind.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// This event's absolute timestamp, in nanoseconds.
    pub fn time(&self) -> u64 {
        self.timestamp
    }

    /// The thread this event occurred on, if any.
    pub fn thread(&self) -> Option<u64> {
        self.sched_ctx.thread
    }

    /// The proc bound to that thread, if any.
    pub fn proc(&self) -> Option<u64> {
        self.sched_ctx.proc
    }

    /// The goroutine running at the time, if any.
    pub fn goroutine(&self) -> Option<u64> {
        self.sched_ctx.goroutine
    }

    /// The stack id carried by this event, if any.
    pub fn stack(&self) -> Option<u64> {
        self.stack_id
    }

    /// This event's metric payload, if it is a [`EventKind::Metric`].
    pub fn metric(&self) -> Option<&Metric> {
        match &self.kind {
            EventKind::Metric(m) => Some(m),
            _ => None,
        }
    }

    /// This event's label payload, if it is a [`EventKind::Label`].
    pub fn label(&self) -> Option<&Label> {
        match &self.kind {
            EventKind::Label(l) => Some(l),
            _ => None,
        }
    }

    /// This event's range payload, if it is a range begin/end.
    pub fn range(&self) -> Option<&Range> {
        match &self.kind {
            EventKind::RangeBegin(r) | EventKind::RangeEnd(r) => Some(r),
            _ => None,
        }
    }

    /// This event's task payload, if it is a task begin/end.
    pub fn task(&self) -> Option<&Task> {
        match &self.kind {
            EventKind::TaskBegin(t) | EventKind::TaskEnd(t) => Some(t),
            _ => None,
        }
    }

    /// This event's region payload, if it is a region begin/end.
    pub fn region(&self) -> Option<&Region> {
        match &self.kind {
            EventKind::RegionBegin(r) | EventKind::RegionEnd(r) => Some(r),
            _ => None,
        }
    }

    /// This event's log payload, if it is a [`EventKind::Log`].
    pub fn log(&self) -> Option<&Log> {
        match &self.kind {
            EventKind::Log(l) => Some(l),
            _ => None,
        }
    }

    /// This event's state transition payload, if it is one.
    pub fn state_transition(&self) -> Option<&StateTransition> {
        match &self.kind {
            EventKind::StateTransition(t) => Some(t),
            _ => None,
        }
    }
}
