//! Ordering & state-machine validator (C5): the hardest part. Owns every
//! resource's current state and decides whether a candidate event may be
//! published, must be deferred, or is simply invalid.

use crate::error::SemanticError;
use crate::event::{
    Anomaly, Event, EventKind, Label, Log, Metric, Range, RangeScope, Region, ResourceKind,
    ResourceState, SchedCtx, StackSample, StateTransition, Task,
};
use crate::generation::GenerationTables;
use crate::opcodes::{go_block_reason, go_stop_reason, stw_reason, Op};
use crate::wire::RawEvent;
use std::collections::{HashMap, HashSet};

/// How the validator disposes of a candidate event.
#[derive(Debug)]
pub enum Outcome {
    /// The event was valid and has been committed to the validator's
    /// state; here is its public form.
    Accepted(Event),
    /// The event is plausible but cannot be published yet; the reader
    /// should try another cursor first (spec.md §4.5.2).
    Deferred,
    /// The event violates the state machine outright.
    Rejected(SemanticError),
}

#[derive(Debug, Default, Clone, Copy)]
struct MState {
    proc: Option<u64>,
    goroutine: Option<u64>,
}

#[derive(Debug, Clone)]
struct PState {
    state: ResourceState,
    running_thread: Option<u64>,
    steal_seq: u64,
}

impl Default for PState {
    fn default() -> Self {
        Self { state: ResourceState::Undetermined, running_thread: None, steal_seq: 0 }
    }
}

#[derive(Debug, Clone)]
struct GState {
    state: ResourceState,
    thread: Option<u64>,
    active_ranges: HashSet<&'static str>,
}

impl Default for GState {
    fn default() -> Self {
        Self { state: ResourceState::Undetermined, thread: None, active_ranges: HashSet::new() }
    }
}

#[derive(Debug, Clone)]
struct StealRecord {
    from_thread: Option<u64>,
}

/// Resolves how `GoStatus(...Running)` seen after the first Sync should
/// be treated; spec.md §9 leaves this ambiguous in the source ("warns in
/// one path and errors in another"). See `DESIGN.md` for the resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAfterSync {
    /// Flag the event with [`Anomaly::UnknownResource`] but accept it.
    Warn,
    /// Reject the event with [`SemanticError::UnknownResource`].
    Error,
}

/// Whether CPU samples whose sched-ctx disagrees with validator state
/// should be dropped; spec.md §9's second open question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuSampleFilter {
    /// Keep all samples; they are best-effort annotations.
    KeepAll,
    /// Drop samples whose goroutine/proc disagree with current state.
    FilterDisagreeing,
}

/// Owns all per-resource mutable state for one trace (spec.md §4.5).
#[derive(Debug)]
pub struct Validator {
    m_state: HashMap<u64, MState>,
    p_state: HashMap<u64, PState>,
    g_state: HashMap<u64, GState>,
    active_tasks: HashMap<u64, Task>,
    stolen_procs: HashMap<u64, StealRecord>,
    global_ranges: HashSet<&'static str>,
    last_emitted_ts: u64,
    seen_first_sync: bool,
    status_after_sync: StatusAfterSync,
    cpu_sample_filter: CpuSampleFilter,
}

impl Validator {
    /// Creates a fresh validator. A new [`crate::Reader`] always starts
    /// with a fresh validator (spec.md §9 "Global-ish state").
    pub fn new(status_after_sync: StatusAfterSync, cpu_sample_filter: CpuSampleFilter) -> Self {
        Self {
            m_state: HashMap::new(),
            p_state: HashMap::new(),
            g_state: HashMap::new(),
            active_tasks: HashMap::new(),
            stolen_procs: HashMap::new(),
            global_ranges: HashSet::new(),
            last_emitted_ts: 0,
            seen_first_sync: false,
            status_after_sync,
            cpu_sample_filter,
        }
    }

    /// Whether the first Sync has been emitted yet. After this point,
    /// `Undetermined` status events for previously-unseen resources are
    /// governed by `status_after_sync` (spec.md §3 invariant).
    pub fn seen_first_sync(&self) -> bool {
        self.seen_first_sync
    }

    /// Clamps `candidate_ts` to monotonic strictly-increasing order
    /// (spec.md §4.5.3) and records it as the last emitted timestamp.
    fn bump_timestamp(&mut self, candidate_ts: u64) -> u64 {
        let ts = candidate_ts.max(self.last_emitted_ts.saturating_add(1));
        self.last_emitted_ts = ts;
        ts
    }

    fn sched_ctx(&self, thread: u64) -> SchedCtx {
        let m = self.m_state.get(&thread).copied().unwrap_or_default();
        SchedCtx { thread: Some(thread), proc: m.proc, goroutine: m.goroutine }
    }

    /// Produces the synthetic Sync event emitted at a generation
    /// boundary (spec.md §4.5.4). `floor_ns` is the new generation's
    /// own clock floor (its batches' latest header timestamp); Sync
    /// carries `max(last_emitted_ts, floor_ns)` without applying the
    /// usual +1 bump, so a generation with no committed events yet
    /// (spec.md §8 S2) still reports its own time rather than 0.
    pub fn synthesize_sync(&mut self, floor_ns: u64) -> Event {
        self.seen_first_sync = true;
        self.last_emitted_ts = self.last_emitted_ts.max(floor_ns);
        Event {
            timestamp: self.last_emitted_ts,
            kind: EventKind::Sync,
            sched_ctx: SchedCtx::default(),
            raw_type: None,
            stack_id: None,
            anomaly: None,
        }
    }

    /// Evaluates one candidate event from `from_thread` against current
    /// state.
    pub fn advance(
        &mut self,
        candidate: &RawEvent,
        timestamp_ns: u64,
        tables: &GenerationTables,
        from_thread: u64,
    ) -> Outcome {
        match self.apply(candidate, tables, from_thread) {
            Ok(Applied::Commit { kind, sched_ctx, anomaly }) => {
                let ts = self.bump_timestamp(timestamp_ns);
                Outcome::Accepted(Event {
                    timestamp: ts,
                    kind,
                    sched_ctx,
                    raw_type: Some(candidate.op.as_byte()),
                    stack_id: candidate.stack_id,
                    anomaly,
                })
            }
            Ok(Applied::Defer) => Outcome::Deferred,
            Err(e) => Outcome::Rejected(e),
        }
    }

    fn apply(
        &mut self,
        ev: &RawEvent,
        _tables: &GenerationTables,
        from_thread: u64,
    ) -> Result<Applied, SemanticError> {
        use Op::*;
        let a = &ev.args;
        match ev.op {
            EvGoCreate => self.go_create(a[1], from_thread),
            EvGoStart => self.go_start(a[1], from_thread),
            EvGoStop => self.go_stop(a[1], from_thread),
            EvGoBlock => self.go_block(a[1], from_thread),
            EvGoUnblock => self.go_unblock(a[1], from_thread),
            EvGoSyscallBegin => self.go_syscall_begin(from_thread),
            EvGoSyscallEnd => self.go_syscall_end(from_thread),
            EvGoSyscallEndBlocked => self.go_syscall_end_blocked(from_thread),
            EvGoDestroy => self.go_destroy(from_thread),
            EvGoStatus => self.go_status(a[1], a[2], a[3]),
            EvProcStart => self.proc_start(a[1], from_thread),
            EvProcStop => self.proc_stop(from_thread),
            EvProcSteal => self.proc_steal(a[1], from_thread),
            EvProcStatus => self.proc_status(a[1], a[2], from_thread),
            EvSTWBegin => self.range_begin(RangeScope::None, "stw", from_thread, Some(stw_reason(a[1]))),
            EvSTWEnd => self.range_end(RangeScope::None, "stw", from_thread),
            // GCBegin's second argument is a GC cycle sequence number, not
            // a reason code, so no canonical string applies here.
            EvGCBegin => self.range_begin(RangeScope::None, "gc", from_thread, None),
            EvGCEnd => self.range_end(RangeScope::None, "gc", from_thread),
            EvGCSweepBegin => {
                let g = self.current_goroutine(from_thread);
                self.range_begin(RangeScope::Goroutine(g.unwrap_or(0)), "sweep", from_thread, None)
            }
            EvGCSweepEnd => {
                let g = self.current_goroutine(from_thread);
                self.range_end(RangeScope::Goroutine(g.unwrap_or(0)), "sweep", from_thread)
            }
            EvGCMarkAssistBegin => {
                let g = self.current_goroutine(from_thread);
                self.range_begin(
                    RangeScope::Goroutine(g.unwrap_or(0)),
                    "mark-assist",
                    from_thread,
                    None,
                )
            }
            EvGCMarkAssistEnd => {
                let g = self.current_goroutine(from_thread);
                self.range_end(RangeScope::Goroutine(g.unwrap_or(0)), "mark-assist", from_thread)
            }
            EvHeapAlloc => Ok(self.metric("heap-alloc-bytes", a[1], from_thread)),
            EvHeapGoal => Ok(self.metric("heap-goal-bytes", a[1], from_thread)),
            EvProcsChange => Ok(self.metric("procs", a[1], from_thread)),
            EvLabel => Ok(self.label(a[1], a[2], from_thread)),
            EvUserTaskBegin => Ok(self.task_begin(a[1], a[2], a[3], from_thread)),
            EvUserTaskEnd => Ok(self.task_end(a[1], from_thread)),
            EvUserRegionBegin => Ok(self.region_begin(nonzero(a[1]), a[2], from_thread)),
            EvUserRegionEnd => Ok(self.region_end(nonzero(a[1]), a[2], from_thread)),
            EvUserLog => Ok(self.user_log(nonzero(a[1]), a[2], ev.data.clone().unwrap_or_default(), from_thread)),
            _ => Err(SemanticError::BadTransition(format!("opcode {:?} is not a validator event", ev.op))),
        }
    }

    fn current_goroutine(&self, thread: u64) -> Option<u64> {
        self.m_state.get(&thread).and_then(|m| m.goroutine)
    }

    // --- Goroutine transitions -------------------------------------------------

    fn go_create(&mut self, g_new: u64, from_thread: u64) -> Result<Applied, SemanticError> {
        let caller = self
            .current_goroutine(from_thread)
            .ok_or_else(|| SemanticError::BadTransition("GoCreate: caller has no bound goroutine".into()))?;
        let caller_state = self.g_state.get(&caller).map(|s| s.state);
        if caller_state != Some(ResourceState::Running) {
            return Err(SemanticError::BadTransition(format!(
                "GoCreate: caller goroutine {caller} is not Running"
            )));
        }
        let existing = self.g_state.entry(g_new).or_default();
        if !matches!(existing.state, ResourceState::NotExist | ResourceState::Undetermined) {
            return Err(SemanticError::BadTransition(format!(
                "GoCreate: goroutine {g_new} already exists"
            )));
        }
        let from = existing.state;
        existing.state = ResourceState::Runnable;
        self.commit_transition(ResourceKind::Goroutine, g_new, from, ResourceState::Runnable, None, from_thread)
    }

    fn go_start(&mut self, g: u64, from_thread: u64) -> Result<Applied, SemanticError> {
        if self.m_state.get(&from_thread).map(|m| m.goroutine).unwrap_or(None).is_some() {
            return Err(SemanticError::BadTransition(format!(
                "GoStart: thread {from_thread} already bound to a goroutine"
            )));
        }
        let gs = self.g_state.entry(g).or_default();
        if gs.state != ResourceState::Runnable {
            return Ok(Applied::Defer);
        }
        let from = gs.state;
        gs.state = ResourceState::Running;
        gs.thread = Some(from_thread);
        self.m_state.entry(from_thread).or_default().goroutine = Some(g);
        self.commit_transition(ResourceKind::Goroutine, g, from, ResourceState::Running, None, from_thread)
    }

    fn go_stop(&mut self, reason: u64, from_thread: u64) -> Result<Applied, SemanticError> {
        let g = self.require_running_goroutine(from_thread)?;
        let gs = self.g_state.get_mut(&g).expect("checked above");
        let from = gs.state;
        gs.state = ResourceState::Runnable;
        gs.thread = None;
        self.m_state.entry(from_thread).or_default().goroutine = None;
        let reason_str = go_stop_reason(reason);
        self.commit_transition(
            ResourceKind::Goroutine,
            g,
            from,
            ResourceState::Runnable,
            Some(reason_str),
            from_thread,
        )
    }

    fn go_block(&mut self, reason: u64, from_thread: u64) -> Result<Applied, SemanticError> {
        let g = self.require_running_goroutine(from_thread)?;
        let gs = self.g_state.get_mut(&g).expect("checked above");
        let from = gs.state;
        gs.state = ResourceState::Waiting;
        gs.thread = None;
        self.m_state.entry(from_thread).or_default().goroutine = None;
        let reason_str = go_block_reason(reason);
        self.commit_transition(
            ResourceKind::Goroutine,
            g,
            from,
            ResourceState::Waiting,
            Some(reason_str),
            from_thread,
        )
    }

    fn go_unblock(&mut self, g: u64, from_thread: u64) -> Result<Applied, SemanticError> {
        let Some(gs) = self.g_state.get_mut(&g) else {
            // The blocking side hasn't been observed yet: the reader
            // should try another cursor before giving up.
            return Ok(Applied::Defer);
        };
        if gs.state != ResourceState::Waiting {
            return Ok(Applied::Defer);
        }
        let from = gs.state;
        gs.state = ResourceState::Runnable;
        self.commit_transition(ResourceKind::Goroutine, g, from, ResourceState::Runnable, None, from_thread)
    }

    fn go_syscall_begin(&mut self, from_thread: u64) -> Result<Applied, SemanticError> {
        let g = self.require_running_goroutine(from_thread)?;
        let gs = self.g_state.get_mut(&g).expect("checked above");
        let from = gs.state;
        gs.state = ResourceState::Syscall;
        self.commit_transition(ResourceKind::Goroutine, g, from, ResourceState::Syscall, None, from_thread)
    }

    fn go_syscall_end(&mut self, from_thread: u64) -> Result<Applied, SemanticError> {
        let g = self
            .current_goroutine(from_thread)
            .ok_or_else(|| SemanticError::BadTransition("GoSyscallEnd: no goroutine bound".into()))?;
        let gs = self.g_state.get_mut(&g).ok_or_else(|| {
            SemanticError::UnknownResource(format!("goroutine {g}"))
        })?;
        if gs.state != ResourceState::Syscall {
            return Err(SemanticError::BadTransition(format!(
                "GoSyscallEnd: goroutine {g} is not in Syscall"
            )));
        }
        let from = gs.state;
        gs.state = ResourceState::Running;
        self.commit_transition(ResourceKind::Goroutine, g, from, ResourceState::Running, None, from_thread)
    }

    fn go_syscall_end_blocked(&mut self, from_thread: u64) -> Result<Applied, SemanticError> {
        let g = self
            .current_goroutine(from_thread)
            .ok_or_else(|| SemanticError::BadTransition("GoSyscallEndBlocked: no goroutine bound".into()))?;
        let stolen = self.stolen_procs.iter().find(|(_, rec)| rec.from_thread == Some(from_thread)).map(|(p, _)| *p);
        let Some(proc_id) = stolen else {
            return Ok(Applied::Defer);
        };
        self.stolen_procs.remove(&proc_id);
        let gs = self.g_state.get_mut(&g).ok_or_else(|| SemanticError::UnknownResource(format!("goroutine {g}")))?;
        if gs.state != ResourceState::Syscall {
            return Err(SemanticError::BadTransition(format!(
                "GoSyscallEndBlocked: goroutine {g} is not in Syscall"
            )));
        }
        let from = gs.state;
        gs.state = ResourceState::Runnable;
        gs.thread = None;
        self.m_state.entry(from_thread).or_default().goroutine = None;
        self.commit_transition(ResourceKind::Goroutine, g, from, ResourceState::Runnable, None, from_thread)
    }

    fn go_destroy(&mut self, from_thread: u64) -> Result<Applied, SemanticError> {
        let g = self.require_running_goroutine(from_thread)?;
        let gs = self.g_state.get_mut(&g).expect("checked above");
        if !gs.active_ranges.is_empty() {
            return Err(SemanticError::BadTransition(format!(
                "GoDestroy: goroutine {g} has active ranges {:?}",
                gs.active_ranges
            )));
        }
        let from = gs.state;
        gs.state = ResourceState::NotExist;
        gs.thread = None;
        self.m_state.entry(from_thread).or_default().goroutine = None;
        self.commit_transition(ResourceKind::Goroutine, g, from, ResourceState::NotExist, None, from_thread)
    }

    fn go_status(&mut self, g: u64, thread: u64, state_code: u64) -> Result<Applied, SemanticError> {
        let state = decode_state_code(state_code);
        let gs = self.g_state.entry(g).or_default();
        if gs.state != ResourceState::Undetermined {
            if self.seen_first_sync {
                return match self.status_after_sync {
                    StatusAfterSync::Error => {
                        Err(SemanticError::UnknownResource(format!("goroutine {g} status after first Sync")))
                    }
                    StatusAfterSync::Warn => {
                        let from = gs.state;
                        gs.state = state;
                        if matches!(state, ResourceState::Running | ResourceState::Syscall) {
                            gs.thread = Some(thread);
                            self.m_state.entry(thread).or_default().goroutine = Some(g);
                        }
                        self.commit_transition_with_anomaly(
                            ResourceKind::Goroutine,
                            g,
                            from,
                            state,
                            None,
                            thread,
                            Some(Anomaly::UnknownResource),
                        )
                    }
                };
            }
        }
        let from = gs.state;
        gs.state = state;
        if matches!(state, ResourceState::Running | ResourceState::Syscall) {
            gs.thread = Some(thread);
            self.m_state.entry(thread).or_default().goroutine = Some(g);
        }
        self.commit_transition(ResourceKind::Goroutine, g, from, state, None, thread)
    }

    fn require_running_goroutine(&self, from_thread: u64) -> Result<u64, SemanticError> {
        let g = self
            .current_goroutine(from_thread)
            .ok_or_else(|| SemanticError::BadTransition(format!("thread {from_thread} has no bound goroutine")))?;
        let state = self.g_state.get(&g).map(|s| s.state);
        if state != Some(ResourceState::Running) {
            return Err(SemanticError::BadTransition(format!("goroutine {g} is not Running")));
        }
        Ok(g)
    }

    // --- Proc transitions --------------------------------------------------

    fn proc_start(&mut self, p: u64, from_thread: u64) -> Result<Applied, SemanticError> {
        let ps = self.p_state.entry(p).or_default();
        if ps.state == ResourceState::Running {
            return Err(SemanticError::BadTransition(format!("ProcStart: proc {p} already Running")));
        }
        let from = ps.state;
        ps.state = ResourceState::Running;
        ps.running_thread = Some(from_thread);
        self.m_state.entry(from_thread).or_default().proc = Some(p);
        self.commit_transition(ResourceKind::Proc, p, from, ResourceState::Running, None, from_thread)
    }

    fn proc_stop(&mut self, from_thread: u64) -> Result<Applied, SemanticError> {
        let Some(p) = self.m_state.get(&from_thread).and_then(|m| m.proc) else {
            return Err(SemanticError::BadTransition(format!("ProcStop: thread {from_thread} has no bound proc")));
        };
        let ps = self.p_state.get_mut(&p).ok_or_else(|| SemanticError::UnknownResource(format!("proc {p}")))?;
        if ps.state != ResourceState::Running || ps.running_thread != Some(from_thread) {
            return Err(SemanticError::BadTransition(format!(
                "ProcStop: proc {p} is not Running on thread {from_thread}"
            )));
        }
        let from = ps.state;
        ps.state = ResourceState::Idle;
        ps.running_thread = None;
        self.m_state.entry(from_thread).or_default().proc = None;
        self.commit_transition(ResourceKind::Proc, p, from, ResourceState::Idle, None, from_thread)
    }

    fn proc_steal(&mut self, p: u64, from_thread: u64) -> Result<Applied, SemanticError> {
        let ps = self.p_state.entry(p).or_default();
        let from = ps.state;
        let old_thread = ps.running_thread;
        ps.state = ResourceState::Running;
        ps.running_thread = Some(from_thread);
        ps.steal_seq += 1;
        self.stolen_procs.insert(p, StealRecord { from_thread: old_thread });
        if let Some(old_thread) = old_thread {
            if let Some(old) = self.m_state.get_mut(&old_thread) {
                old.proc = None;
            }
        }
        self.m_state.entry(from_thread).or_default().proc = Some(p);
        self.commit_transition(ResourceKind::Proc, p, from, ResourceState::Running, None, from_thread)
    }

    fn proc_status(&mut self, p: u64, state_code: u64, from_thread: u64) -> Result<Applied, SemanticError> {
        let state = decode_state_code(state_code);
        let ps = self.p_state.entry(p).or_default();
        if ps.state != ResourceState::Undetermined && self.seen_first_sync {
            return Err(SemanticError::UnknownResource(format!("proc {p} status after first Sync")));
        }
        let from = ps.state;
        ps.state = state;
        if state == ResourceState::Running {
            ps.running_thread = Some(from_thread);
            self.m_state.entry(from_thread).or_default().proc = Some(p);
        }
        self.commit_transition(ResourceKind::Proc, p, from, state, None, from_thread)
    }

    // --- Ranges --------------------------------------------------------------

    fn range_begin(
        &mut self,
        scope: RangeScope,
        name: &'static str,
        from_thread: u64,
        reason: Option<&'static str>,
    ) -> Result<Applied, SemanticError> {
        let active = self.active_ranges_for(scope);
        if !active.insert(name) {
            return Err(SemanticError::DuplicateActiveRange(name.to_string()));
        }
        Ok(Applied::Commit {
            kind: EventKind::RangeBegin(Range { scope, name, reason }),
            sched_ctx: self.sched_ctx(from_thread),
            anomaly: None,
        })
    }

    fn range_end(
        &mut self,
        scope: RangeScope,
        name: &'static str,
        from_thread: u64,
    ) -> Result<Applied, SemanticError> {
        let active = self.active_ranges_for(scope);
        if !active.remove(name) {
            return Err(SemanticError::InactiveRangeEnded(name.to_string()));
        }
        Ok(Applied::Commit {
            kind: EventKind::RangeEnd(Range { scope, name, reason: None }),
            sched_ctx: self.sched_ctx(from_thread),
            anomaly: None,
        })
    }

    fn active_ranges_for(&mut self, scope: RangeScope) -> &mut HashSet<&'static str> {
        match scope {
            RangeScope::None => &mut self.global_ranges,
            RangeScope::Goroutine(g) => &mut self.g_state.entry(g).or_default().active_ranges,
        }
    }

    // --- Stateless kinds -------------------------------------------------

    fn metric(&mut self, name: &'static str, value: u64, from_thread: u64) -> Applied {
        Applied::Commit {
            kind: EventKind::Metric(Metric { name, value }),
            sched_ctx: self.sched_ctx(from_thread),
            anomaly: None,
        }
    }

    fn label(&mut self, goroutine: u64, label_string_id: u64, from_thread: u64) -> Applied {
        Applied::Commit {
            kind: EventKind::Label(Label { goroutine, label_string_id }),
            sched_ctx: self.sched_ctx(from_thread),
            anomaly: None,
        }
    }

    // --- Tasks / regions / logs -----------------------------------------

    fn task_begin(&mut self, id: u64, name_string_id: u64, parent_id: u64, from_thread: u64) -> Applied {
        let task = Task { id, name_string_id: Some(name_string_id), parent_id: nonzero(parent_id) };
        self.active_tasks.insert(id, task);
        Applied::Commit {
            kind: EventKind::TaskBegin(task),
            sched_ctx: self.sched_ctx(from_thread),
            anomaly: None,
        }
    }

    fn task_end(&mut self, id: u64, from_thread: u64) -> Applied {
        let (task, anomaly) = match self.active_tasks.remove(&id) {
            Some(t) => (t, None),
            None => (Task { id, name_string_id: None, parent_id: None }, Some(Anomaly::UnknownResource)),
        };
        Applied::Commit { kind: EventKind::TaskEnd(task), sched_ctx: self.sched_ctx(from_thread), anomaly }
    }

    fn region_begin(&mut self, task_id: Option<u64>, name_string_id: u64, from_thread: u64) -> Applied {
        Applied::Commit {
            kind: EventKind::RegionBegin(Region { task_id, name_string_id }),
            sched_ctx: self.sched_ctx(from_thread),
            anomaly: None,
        }
    }

    fn region_end(&mut self, task_id: Option<u64>, name_string_id: u64, from_thread: u64) -> Applied {
        Applied::Commit {
            kind: EventKind::RegionEnd(Region { task_id, name_string_id }),
            sched_ctx: self.sched_ctx(from_thread),
            anomaly: None,
        }
    }

    fn user_log(&mut self, task_id: Option<u64>, category_string_id: u64, message: Vec<u8>, from_thread: u64) -> Applied {
        Applied::Commit {
            kind: EventKind::Log(Log { task_id, category_string_id, message }),
            sched_ctx: self.sched_ctx(from_thread),
            anomaly: None,
        }
    }

    // --- CPU samples (not routed through `apply`; driven by the reader) --

    /// Builds the event for a CPU sample. Applies `cpu_sample_filter` if
    /// the sample's sched-ctx disagrees with current state (spec.md §9,
    /// second open question).
    pub fn cpu_sample_event(
        &self,
        timestamp_ns: u64,
        thread: u64,
        proc: u64,
        goroutine: u64,
        stack_id: u64,
        tables: &GenerationTables,
    ) -> Option<Event> {
        if self.cpu_sample_filter == CpuSampleFilter::FilterDisagreeing {
            if self.current_goroutine(thread) != Some(goroutine) {
                return None;
            }
        }
        let anomaly = tables.stack(stack_id).is_empty().then_some(Anomaly::MissingStack);
        Some(Event {
            timestamp: timestamp_ns,
            kind: EventKind::StackSample(StackSample),
            sched_ctx: SchedCtx { thread: Some(thread), proc: Some(proc), goroutine: Some(goroutine) },
            raw_type: Some(Op::EvCPUSample.as_byte()),
            stack_id: Some(stack_id),
            anomaly,
        })
    }

    fn commit_transition(
        &mut self,
        resource: ResourceKind,
        id: u64,
        from: ResourceState,
        to: ResourceState,
        reason: Option<&'static str>,
        from_thread: u64,
    ) -> Result<Applied, SemanticError> {
        self.commit_transition_with_anomaly(resource, id, from, to, reason, from_thread, None)
    }

    fn commit_transition_with_anomaly(
        &mut self,
        resource: ResourceKind,
        id: u64,
        from: ResourceState,
        to: ResourceState,
        reason: Option<&'static str>,
        from_thread: u64,
        anomaly: Option<Anomaly>,
    ) -> Result<Applied, SemanticError> {
        Ok(Applied::Commit {
            kind: EventKind::StateTransition(StateTransition { resource, id, from, to, reason }),
            sched_ctx: self.sched_ctx(from_thread),
            anomaly,
        })
    }
}

enum Applied {
    Commit { kind: EventKind, sched_ctx: SchedCtx, anomaly: Option<Anomaly> },
    Defer,
}

fn decode_state_code(code: u64) -> ResourceState {
    match code {
        0 => ResourceState::NotExist,
        1 => ResourceState::Runnable,
        2 => ResourceState::Running,
        3 => ResourceState::Waiting,
        4 => ResourceState::Syscall,
        5 => ResourceState::SyscallRuntime,
        6 => ResourceState::Idle,
        7 => ResourceState::SyscallBlocked,
        _ => ResourceState::Undetermined,
    }
}

fn nonzero(v: u64) -> Option<u64> {
    (v != 0).then_some(v)
}
