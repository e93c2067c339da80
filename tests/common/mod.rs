//! Shared trace-building helper for integration tests. A deliberately
//! separate, smaller cousin of `src/test_support.rs`'s `TraceBuilder`:
//! integration tests only see this crate's public surface, so this
//! builder is assembled from `gotrace::{batch, opcodes, wire}` directly
//! rather than reusing the internal (`pub(crate)`) unit-test helper.

use gotrace::batch::NO_THREAD;
use gotrace::opcodes::{Op, TraceVersion};
use gotrace::wire::write_uvarint;

#[derive(Default)]
pub struct TraceBuilder {
    buf: Vec<u8>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = TraceVersion::Go122.magic().to_vec();
        out.extend(self.buf);
        out
    }

    fn push_batch(&mut self, thread_id: u64, generation: u64, first_timestamp: u64, payload: Vec<u8>) {
        self.buf.push(Op::EvBatch.as_byte());
        write_uvarint(&mut self.buf, thread_id);
        write_uvarint(&mut self.buf, generation);
        write_uvarint(&mut self.buf, first_timestamp);
        write_uvarint(&mut self.buf, payload.len() as u64);
        self.buf.extend_from_slice(&payload);
    }

    pub fn freq_batch_with(
        &mut self,
        generation: u64,
        thread_id: u64,
        first_timestamp: u64,
        per_second: u64,
    ) -> &mut Self {
        let mut payload = vec![Op::EvFrequency.as_byte()];
        write_uvarint(&mut payload, per_second);
        self.push_batch(thread_id, generation, first_timestamp, payload);
        self
    }

    pub fn freq_batch(&mut self, generation: u64, per_second: u64) -> &mut Self {
        self.freq_batch_with(generation, NO_THREAD, 0, per_second)
    }

    pub fn stacks_batch(&mut self, generation: u64) -> &mut Self {
        // An aux batch carrying zero stacks: present to prove the
        // classifier doesn't choke on an empty table, not exercised for
        // its entries by any scenario here.
        let payload = vec![Op::EvStacks.as_byte()];
        self.push_batch(NO_THREAD, generation, 0, payload);
        self
    }

    pub fn thread_batch(
        &mut self,
        thread_id: u64,
        generation: u64,
        first_timestamp: u64,
        build: impl FnOnce(&mut ThreadBatchBuilder),
    ) -> &mut Self {
        let mut inner = ThreadBatchBuilder { payload: Vec::new() };
        build(&mut inner);
        self.push_batch(thread_id, generation, first_timestamp, inner.payload);
        self
    }
}

pub struct ThreadBatchBuilder {
    payload: Vec<u8>,
}

impl ThreadBatchBuilder {
    fn raw(&mut self, op: Op, ts_delta: u64, rest: &[u64]) -> &mut Self {
        self.payload.push(op.as_byte());
        write_uvarint(&mut self.payload, ts_delta);
        for &arg in rest {
            write_uvarint(&mut self.payload, arg);
        }
        self
    }

    pub fn proc_status(&mut self, ts_delta: u64, proc: u64, state: u64) -> &mut Self {
        self.raw(Op::EvProcStatus, ts_delta, &[proc, state])
    }

    pub fn go_status(&mut self, ts_delta: u64, goroutine: u64, thread: u64, state: u64) -> &mut Self {
        self.raw(Op::EvGoStatus, ts_delta, &[goroutine, thread, state])
    }

    pub fn go_stop(&mut self, ts_delta: u64, reason: u64, stack_id: u64) -> &mut Self {
        self.raw(Op::EvGoStop, ts_delta, &[reason, stack_id])
    }

    pub fn go_block(&mut self, ts_delta: u64, reason: u64, stack_id: u64) -> &mut Self {
        self.raw(Op::EvGoBlock, ts_delta, &[reason, stack_id])
    }

    pub fn go_unblock(&mut self, ts_delta: u64, goroutine: u64, stack_id: u64) -> &mut Self {
        self.raw(Op::EvGoUnblock, ts_delta, &[goroutine, stack_id])
    }

    pub fn go_create(&mut self, ts_delta: u64, goroutine: u64, stack_id: u64) -> &mut Self {
        self.raw(Op::EvGoCreate, ts_delta, &[goroutine, stack_id])
    }
}
