//! The exclusive-state arbiter.
//!
//! A FIFO of tickets tagged shared/exclusive, admission-ordered the way
//! `gazette::router::Router` dials and retires member channels by strict
//! per-key sequencing — here the "key" is simply ticket order, and what's
//! being serialized is write-exclusion over the primitive store rather than
//! RPC dispatch.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Shared,
    Exclusive,
}

/// Per-request admission class, mapped to a [`Kind`] (or no admission
/// requirement at all) by [`RequestClass::xstate_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Read,
    Verify,
    Iterate,
    Dump,
    Write,
    Restore,
    ReplicaWrite,
    Sync,
    Status,
    /// A request that already failed before reaching admission control
    /// (Requests with an error status get `none`).
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XstateKind {
    Shared,
    Exclusive,
    None,
}

impl RequestClass {
    /// Maps a request class to its exclusive/shared access kind.
    pub fn xstate_kind(&self, is_replica: bool, is_leader: bool) -> XstateKind {
        match self {
            RequestClass::Read | RequestClass::Verify | RequestClass::Iterate | RequestClass::Dump => {
                XstateKind::Shared
            }
            RequestClass::Write | RequestClass::Restore | RequestClass::ReplicaWrite => {
                if is_replica {
                    XstateKind::Shared
                } else {
                    XstateKind::Exclusive
                }
            }
            RequestClass::Sync => {
                if is_leader {
                    XstateKind::Exclusive
                } else {
                    XstateKind::Shared
                }
            }
            RequestClass::Status => {
                if is_leader {
                    XstateKind::Shared
                } else {
                    XstateKind::None
                }
            }
            RequestClass::Errored => XstateKind::None,
        }
    }
}

struct Entry {
    id: Ticket,
    kind: Kind,
    activate: Option<Box<dyn FnOnce()>>,
    activated: bool,
}

/// The FIFO arbiter itself.
#[derive(Default)]
pub struct Arbiter {
    queue: VecDeque<Entry>,
    next_id: u64,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of the leading run of tickets that are "running" right now
    ///: an exclusive ticket runs alone at the head; a run of
    /// consecutive shared tickets at the head all run together, up to (but
    /// excluding) the first exclusive ticket behind them.
    fn running_prefix_len(&self) -> usize {
        match self.queue.front() {
            None => 0,
            Some(front) if front.kind == Kind::Exclusive => 1,
            Some(_) => self.queue.iter().take_while(|e| e.kind == Kind::Shared).count(),
        }
    }

    fn position(&self, ticket: Ticket) -> Option<usize> {
        self.queue.iter().position(|e| e.id == ticket)
    }

    /// Fires `activate` for every running entry that hasn't been activated
    /// yet (wake the caller via `activate_fn` when it
    /// becomes running).
    fn fire_activations(&mut self) {
        let running_len = self.running_prefix_len();
        for entry in self.queue.iter_mut().take(running_len) {
            if !entry.activated {
                entry.activated = true;
                if let Some(activate) = entry.activate.take() {
                    activate();
                }
            }
        }
    }

    fn enqueue(&mut self, kind: Kind, activate_fn: impl FnOnce() + 'static) -> Ticket {
        let id = Ticket(self.next_id);
        self.next_id += 1;
        self.queue.push_back(Entry { id, kind, activate: Some(Box::new(activate_fn)), activated: false });
        tracing::debug!(ticket = id.0, ?kind, "enqueued xstate ticket");
        self.fire_activations();
        id
    }

    pub fn get_shared(&mut self, activate_fn: impl FnOnce() + 'static) -> Ticket {
        self.enqueue(Kind::Shared, activate_fn)
    }

    pub fn get_exclusive(&mut self, activate_fn: impl FnOnce() + 'static) -> Ticket {
        self.enqueue(Kind::Exclusive, activate_fn)
    }

    pub fn is_running(&self, ticket: Ticket) -> bool {
        match self.position(ticket) {
            Some(pos) => pos < self.running_prefix_len(),
            None => false,
        }
    }

    /// True if there is any ticket behind `ticket` in FIFO order that is
    /// not currently running.
    pub fn any_waiting_behind(&self, ticket: Ticket) -> bool {
        let running_len = self.running_prefix_len();
        let Some(pos) = self.position(ticket) else { return false };
        self.queue.iter().enumerate().skip(pos + 1).any(|(i, _)| i >= running_len)
    }

    /// Moves `ticket` to the tail of the queue at the given `kind`,
    /// clearing its running status.
    pub fn reissue(&mut self, ticket: Ticket, kind: Kind, activate_fn: impl FnOnce() + 'static) -> Option<Ticket> {
        let pos = self.position(ticket)?;
        self.queue.remove(pos);
        tracing::debug!(ticket = ticket.0, ?kind, "reissued xstate ticket to tail");
        Some(self.enqueue(kind, activate_fn))
    }

    /// Releases `ticket`, potentially promoting the next entries to
    /// running.
    pub fn delete(&mut self, ticket: Ticket) {
        if let Some(pos) = self.position(ticket) {
            self.queue.remove(pos);
            tracing::debug!(ticket = ticket.0, "deleted xstate ticket");
            self.fire_activations();
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Called inside long-running readers to voluntarily yield when a writer
/// is queued behind them: if there is a
/// waiter, `ticket` is reissued (at its own kind) to the tail and `true` is
/// returned; writers never call this.
pub fn xstate_break(arbiter: &mut Arbiter, ticket: Ticket, kind: Kind) -> bool {
    if arbiter.any_waiting_behind(ticket) {
        arbiter.reissue(ticket, kind, || {});
        true
    } else {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn tracked_activation() -> (Rc<Cell<bool>>, impl FnOnce() + 'static) {
        let flag = Rc::new(Cell::new(false));
        let inner = flag.clone();
        (flag, move || inner.set(true))
    }

    #[test]
    fn shared_tickets_run_concurrently() {
        let mut arbiter = Arbiter::new();
        let (a_flag, a_fn) = tracked_activation();
        let (b_flag, b_fn) = tracked_activation();
        let a = arbiter.get_shared(a_fn);
        let b = arbiter.get_shared(b_fn);
        assert!(a_flag.get());
        assert!(b_flag.get());
        assert!(arbiter.is_running(a));
        assert!(arbiter.is_running(b));
    }

    #[test]
    fn exclusive_waits_for_shared_to_drain_and_runs_alone() {
        let mut arbiter = Arbiter::new();
        let a = arbiter.get_shared(|| {});
        let b = arbiter.get_shared(|| {});
        let (c_flag, c_fn) = tracked_activation();
        let c = arbiter.get_exclusive(c_fn);

        assert!(!c_flag.get(), "exclusive must not run while shared tickets are active");
        assert!(arbiter.any_waiting_behind(a));

        arbiter.delete(a);
        assert!(!c_flag.get(), "still waiting on b");
        arbiter.delete(b);
        assert!(c_flag.get(), "exclusive runs once all shared ahead of it have drained");
        assert!(arbiter.is_running(c));
    }

    #[test]
    fn full_scenario_from_spec_section_8() {
        // enqueue (shared A, shared B, exclusive C, shared D)
        let mut arbiter = Arbiter::new();
        let a = arbiter.get_shared(|| {});
        let b = arbiter.get_shared(|| {});
        let (c_flag, c_fn) = tracked_activation();
        let c = arbiter.get_exclusive(c_fn);
        let (d_flag, d_fn) = tracked_activation();
        let d = arbiter.get_shared(d_fn);

        assert!(arbiter.is_running(a));
        assert!(arbiter.is_running(b));
        assert!(!arbiter.is_running(c));
        assert!(!arbiter.is_running(d));
        assert!(arbiter.any_waiting_behind(a), "C waits behind A and B");

        arbiter.delete(a);
        arbiter.delete(b);
        assert!(c_flag.get());
        assert!(arbiter.is_running(c));
        assert!(!d_flag.get(), "D must not run while C is exclusive");

        arbiter.delete(c);
        assert!(d_flag.get());
        assert!(arbiter.is_running(d));
    }

    #[test]
    fn fifo_order_is_preserved_shared_cannot_overtake_exclusive() {
        let mut arbiter = Arbiter::new();
        let a = arbiter.get_exclusive(|| {});
        let (b_flag, b_fn) = tracked_activation();
        let _b = arbiter.get_shared(b_fn);
        assert!(!b_flag.get());
        assert!(arbiter.is_running(a));
    }

    #[test]
    fn reissue_lets_a_waiting_ticket_take_over() {
        let mut arbiter = Arbiter::new();
        let a = arbiter.get_shared(|| {});
        let (c_flag, c_fn) = tracked_activation();
        let c = arbiter.get_exclusive(c_fn);
        assert!(!c_flag.get(), "c waits behind a");

        // Reissuing a (a reader voluntarily yielding via xstate_break)
        // moves it behind c, letting c become the new head.
        let a2 = arbiter.reissue(a, Kind::Shared, || {}).unwrap();
        assert!(c_flag.get(), "c is now at the head of the queue");
        assert!(arbiter.is_running(c));
        assert!(!arbiter.is_running(a2), "reissued ticket now waits behind the exclusive ticket");
    }

    #[test]
    fn xstate_break_yields_only_when_a_waiter_exists() {
        let mut arbiter = Arbiter::new();
        let a = arbiter.get_shared(|| {});
        assert!(!xstate_break(&mut arbiter, a, Kind::Shared), "no waiter, no break");

        let _c = arbiter.get_exclusive(|| {});
        assert!(xstate_break(&mut arbiter, a, Kind::Shared), "writer waiting behind a");
    }
}
