//! Shared-variable runtime over a TCP mesh.
//!
//! Every peer holds one outbound connection to each other peer and one
//! dispatcher thread per inbound connection. Inbound frames land in a
//! per-peer variable store; waiters block on a condvar until the store
//! satisfies them. Delivery is FIFO per (sender, receiver) connection;
//! writes from different senders interleave arbitrarily, so anything
//! multi-writer is treated as a set, never a sequence.
//!
//! Self-addressed traffic is applied to the local store directly and never
//! touches a socket.

use anyhow::{bail, Context, Result};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const DIAL_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Logical per-peer variables, addressed by name on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Var {
    /// Sample contributions gathered on peer 0.
    Samples,
    /// The broadcast pivot list.
    Pivots,
    /// Shuffle shipments: indexed by sender in the batch strategy,
    /// an append-only inbox in the streamed strategy.
    Buckets,
    /// Per-peer sorted-run lengths for shared-file placement.
    Elements,
    /// Streamed-shuffle sign-off, one slot per sender.
    FinishedSending,
    /// Write-ordering token for sequential placement.
    Sequencer,
}

#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    /// Single-writer slot write: `indexed[index] = payload`.
    Put { var: Var, index: u32, payload: Vec<u8> },
    /// Multi-writer inbox append.
    Append { var: Var, payload: Vec<u8> },
    /// Reduction contribution, always addressed to peer 0.
    Gather { var: Var, payload: Vec<u8> },
    /// Barrier arrival for `epoch`.
    Barrier { epoch: u64 },
    /// Orderly shutdown announcement; EOF without one is a peer failure.
    Goodbye,
}

#[derive(Default)]
struct VarState {
    indexed: HashMap<u32, Vec<u8>>,
    list: Vec<Vec<u8>>,
    gathered: Vec<Vec<u8>>,
    /// Total writes observed; `taken` counts consumed token waits.
    events: u64,
    taken: u64,
}

#[derive(Default)]
struct StoreInner {
    vars: HashMap<Var, VarState>,
    barriers: HashMap<u64, usize>,
    /// Set when any peer connection drops; pending waits fail once their
    /// condition can no longer be met locally.
    closed: bool,
}

struct VarStore {
    inner: Mutex<StoreInner>,
    changed: Condvar,
}

impl VarStore {
    fn new() -> Self {
        Self { inner: Mutex::new(StoreInner::default()), changed: Condvar::new() }
    }

    fn apply(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        match frame {
            Frame::Put { var, index, payload } => {
                let state = inner.vars.entry(var).or_default();
                state.indexed.insert(index, payload);
                state.events += 1;
            }
            Frame::Append { var, payload } => {
                let state = inner.vars.entry(var).or_default();
                state.list.push(payload);
                state.events += 1;
            }
            Frame::Gather { var, payload } => {
                inner.vars.entry(var).or_default().gathered.push(payload);
            }
            Frame::Barrier { epoch } => {
                *inner.barriers.entry(epoch).or_insert(0) += 1;
            }
            Frame::Goodbye => {}
        }
        self.changed.notify_all();
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.changed.notify_all();
    }

    /// Block until `ready` yields a value. Readiness is checked before the
    /// closed flag so that frames already delivered still satisfy waiters
    /// during shutdown.
    fn wait_until<T>(&self, mut ready: impl FnMut(&mut StoreInner) -> Option<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = ready(&mut inner) {
                return Ok(value);
            }
            if inner.closed {
                bail!("peer connection lost before the group completed");
            }
            self.changed.wait(&mut inner);
        }
    }
}

/// Completion handle for a split barrier; see [`PeerGroup::barrier_begin`].
#[must_use]
pub struct BarrierTicket {
    epoch: u64,
}

/// One peer's endpoint of the group: the mesh links plus the local store.
pub struct PeerGroup {
    id: usize,
    size: usize,
    links: Vec<Option<Mutex<TcpStream>>>,
    store: Arc<VarStore>,
    epoch: Mutex<u64>,
}

impl PeerGroup {
    /// Establish the full mesh for peer `id`. The listener must already be
    /// bound to `addrs[id]`; every peer dials every other peer, so each
    /// side ends up with one outbound link and one inbound dispatcher per
    /// neighbour.
    pub fn connect(id: usize, listener: TcpListener, addrs: &[SocketAddr]) -> Result<Arc<Self>> {
        let size = addrs.len();
        if id >= size {
            bail!("peer id {id} out of range for a group of {size}");
        }
        let store = Arc::new(VarStore::new());

        let inbound = size - 1;
        if inbound > 0 {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..inbound {
                    match listener.accept() {
                        Ok((stream, _)) => spawn_dispatcher(stream, store.clone()),
                        Err(err) => {
                            tracing::error!(error = %err, "accept failed");
                            store.close();
                            return;
                        }
                    }
                }
            });
        }

        let mut links = Vec::with_capacity(size);
        for (peer, addr) in addrs.iter().enumerate() {
            if peer == id {
                links.push(None);
                continue;
            }
            let stream = dial(*addr)
                .with_context(|| format!("peer {id}: dial peer {peer} at {addr}"))?;
            stream.set_nodelay(true)?;
            links.push(Some(Mutex::new(stream)));
        }

        Ok(Arc::new(Self { id, size, links, store, epoch: Mutex::new(0) }))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn deliver(&self, target: usize, frame: Frame) -> Result<()> {
        if target == self.id {
            self.store.apply(frame);
            return Ok(());
        }
        let bytes = bincode::serialize(&frame).context("encode frame")?;
        let link = self.links[target].as_ref().expect("link to remote peer");
        let mut stream = link.lock();
        stream
            .write_all(&(bytes.len() as u64).to_le_bytes())
            .and_then(|()| stream.write_all(&bytes))
            .with_context(|| format!("send to peer {target}"))?;
        Ok(())
    }

    /// Write `payload` into slot `index` of `var` on `target`.
    pub fn put(&self, target: usize, var: Var, index: usize, payload: Vec<u8>) -> Result<()> {
        self.deliver(target, Frame::Put { var, index: index as u32, payload })
    }

    /// Append `payload` to `var`'s inbox on `target`.
    pub fn append(&self, target: usize, var: Var, payload: Vec<u8>) -> Result<()> {
        self.deliver(target, Frame::Append { var, payload })
    }

    /// Write slot `index` of `var` on every peer, this one included.
    pub fn broadcast_put(&self, var: Var, index: usize, payload: Vec<u8>) -> Result<()> {
        for peer in 0..self.size {
            let frame = Frame::Put { var, index: index as u32, payload: payload.clone() };
            self.deliver(peer, frame)?;
        }
        Ok(())
    }

    /// Collective reduction: every peer contributes `payload`; peer 0
    /// blocks for all contributions and returns them, everyone else
    /// returns `None` immediately.
    pub fn gather(&self, var: Var, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>> {
        self.deliver(0, Frame::Gather { var, payload })?;
        if self.id != 0 {
            return Ok(None);
        }
        let size = self.size;
        let contributions = self.store.wait_until(|inner| {
            let state = inner.vars.entry(var).or_default();
            if state.gathered.len() >= size {
                Some(std::mem::take(&mut state.gathered))
            } else {
                None
            }
        })?;
        Ok(Some(contributions))
    }

    /// Block until `var` holds at least `count` distinct indexed slots,
    /// then consume and return them ordered by index.
    pub fn wait_indexed(&self, var: Var, count: usize) -> Result<Vec<(u32, Vec<u8>)>> {
        self.store.wait_until(|inner| {
            let state = inner.vars.entry(var).or_default();
            if state.indexed.len() >= count {
                let mut entries: Vec<(u32, Vec<u8>)> =
                    std::mem::take(&mut state.indexed).into_iter().collect();
                entries.sort_unstable_by_key(|(index, _)| *index);
                Some(entries)
            } else {
                None
            }
        })
    }

    /// Drain `var`'s inbox without blocking.
    pub fn take_list(&self, var: Var) -> Vec<Vec<u8>> {
        let mut inner = self.store.inner.lock();
        match inner.vars.get_mut(&var) {
            Some(state) => std::mem::take(&mut state.list),
            None => Vec::new(),
        }
    }

    /// Block until one unconsumed write has hit `var` and consume it.
    pub fn take_token(&self, var: Var) -> Result<()> {
        self.store.wait_until(|inner| {
            let state = inner.vars.entry(var).or_default();
            if state.events > state.taken {
                state.taken += 1;
                Some(())
            } else {
                None
            }
        })
    }

    /// Group-wide barrier: returns once every peer has arrived.
    pub fn barrier(&self) -> Result<()> {
        let ticket = self.barrier_begin()?;
        self.barrier_wait(ticket)
    }

    /// Announce arrival at the next barrier without blocking for the rest
    /// of the group; [`PeerGroup::barrier_wait`] completes it.
    pub fn barrier_begin(&self) -> Result<BarrierTicket> {
        let epoch = {
            let mut epoch = self.epoch.lock();
            *epoch += 1;
            *epoch
        };
        for peer in 0..self.size {
            self.deliver(peer, Frame::Barrier { epoch })?;
        }
        Ok(BarrierTicket { epoch })
    }

    pub fn barrier_wait(&self, ticket: BarrierTicket) -> Result<()> {
        let size = self.size;
        self.store.wait_until(|inner| {
            if inner.barriers.get(&ticket.epoch).copied().unwrap_or(0) >= size {
                inner.barriers.remove(&ticket.epoch);
                Some(())
            } else {
                None
            }
        })
    }

    /// Announce an orderly exit to every neighbour. Best-effort: a peer
    /// that already left has nothing more to wait on, so send failures
    /// here are ignored.
    pub fn shutdown(&self) {
        for peer in 0..self.size {
            if peer != self.id {
                let _ = self.deliver(peer, Frame::Goodbye);
            }
        }
    }
}

fn dial(addr: SocketAddr) -> Result<TcpStream> {
    let deadline = Instant::now() + DIAL_TIMEOUT;
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(err) if Instant::now() < deadline => {
                tracing::trace!(%addr, error = %err, "dial retry");
                thread::sleep(DIAL_RETRY_DELAY);
            }
            Err(err) => return Err(err).with_context(|| format!("dial {addr}")),
        }
    }
}

fn spawn_dispatcher(mut stream: TcpStream, store: Arc<VarStore>) {
    thread::spawn(move || {
        let mut clean = false;
        let mut len_buf = [0u8; 8];
        loop {
            match stream.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                    if !clean {
                        // the peer vanished without a goodbye; wake anyone
                        // whose wait can no longer complete
                        tracing::error!("peer disconnected mid-run");
                        store.close();
                    }
                    return;
                }
                Err(err) => {
                    tracing::error!(error = %err, "peer link failed");
                    store.close();
                    return;
                }
            }
            let len = u64::from_le_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            if let Err(err) = stream.read_exact(&mut buf) {
                tracing::error!(error = %err, "peer link failed mid-frame");
                store.close();
                return;
            }
            match bincode::deserialize::<Frame>(&buf) {
                Ok(Frame::Goodbye) => clean = true,
                Ok(frame) => store.apply(frame),
                Err(err) => {
                    tracing::error!(error = %err, "undecodable frame");
                    store.close();
                    return;
                }
            }
        }
    });
}

/// Bind one loopback listener per peer for an in-process group and return
/// the listeners alongside the mesh address table.
pub fn bind_local_group(size: usize) -> Result<(Vec<TcpListener>, Vec<SocketAddr>)> {
    if size == 0 {
        bail!("a peer group needs at least one peer");
    }
    let mut listeners = Vec::with_capacity(size);
    let mut addrs = Vec::with_capacity(size);
    for _ in 0..size {
        let listener = TcpListener::bind("127.0.0.1:0").context("bind peer listener")?;
        addrs.push(listener.local_addr()?);
        listeners.push(listener);
    }
    Ok((listeners, addrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(size: usize) -> Vec<Arc<PeerGroup>> {
        let (listeners, addrs) = bind_local_group(size).unwrap();
        let handles: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(id, listener)| {
                let addrs = addrs.clone();
                thread::spawn(move || PeerGroup::connect(id, listener, &addrs).unwrap())
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    }

    #[test]
    fn test_put_and_wait_indexed() {
        let groups = mesh(3);
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    let id = group.id();
                    for target in 0..group.size() {
                        group.put(target, Var::Elements, id, vec![id as u8]).unwrap();
                    }
                    let entries = group.wait_indexed(Var::Elements, group.size()).unwrap();
                    let senders: Vec<u32> = entries.iter().map(|(index, _)| *index).collect();
                    assert_eq!(senders, vec![0, 1, 2]);
                    for (index, payload) in entries {
                        assert_eq!(payload, vec![index as u8]);
                    }
                    group.shutdown();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_broadcast_is_byte_identical_on_every_peer() {
        let groups = mesh(4);
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    if group.id() == 0 {
                        group.broadcast_put(Var::Pivots, 0, vec![1, 2, 3, 4, 5]).unwrap();
                    }
                    let mut entries = group.wait_indexed(Var::Pivots, 1).unwrap();
                    assert_eq!(entries.remove(0).1, vec![1, 2, 3, 4, 5]);
                    group.shutdown();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_gather_collects_every_contribution_on_peer_zero() {
        let groups = mesh(3);
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    let payload = vec![group.id() as u8; 2];
                    let gathered = group.gather(Var::Samples, payload).unwrap();
                    match group.id() {
                        0 => {
                            let mut gathered = gathered.unwrap();
                            gathered.sort();
                            assert_eq!(gathered, vec![vec![0, 0], vec![1, 1], vec![2, 2]]);
                        }
                        _ => assert!(gathered.is_none()),
                    }
                    group.barrier().unwrap();
                    group.shutdown();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_barrier_releases_only_after_all_arrive() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let groups = mesh(3);
        let arrived = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let arrived = arrived.clone();
                thread::spawn(move || {
                    if group.id() == 2 {
                        thread::sleep(Duration::from_millis(50));
                    }
                    arrived.fetch_add(1, Ordering::SeqCst);
                    group.barrier().unwrap();
                    assert_eq!(arrived.load(Ordering::SeqCst), 3);
                    group.shutdown();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_token_ring_circulates_in_id_order() {
        let groups = mesh(3);
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let order = order.clone();
                thread::spawn(move || {
                    if group.id() == 0 {
                        group.put(0, Var::Sequencer, 0, Vec::new()).unwrap();
                    }
                    group.take_token(Var::Sequencer).unwrap();
                    order.lock().push(group.id());
                    let next = (group.id() + 1) % group.size();
                    group.put(next, Var::Sequencer, 0, Vec::new()).unwrap();
                    if group.id() == 0 {
                        group.take_token(Var::Sequencer).unwrap();
                    }
                    group.barrier().unwrap();
                    group.shutdown();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_append_inbox_accepts_concurrent_senders() {
        let groups = mesh(3);
        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    for chunk in 0..5u8 {
                        group.append(0, Var::Buckets, vec![group.id() as u8, chunk]).unwrap();
                    }
                    group.broadcast_put(Var::FinishedSending, group.id(), Vec::new()).unwrap();
                    group.wait_indexed(Var::FinishedSending, group.size()).unwrap();
                    let inbox = group.take_list(Var::Buckets);
                    if group.id() == 0 {
                        assert_eq!(inbox.len(), 15);
                    } else {
                        assert!(inbox.is_empty());
                    }
                    group.barrier().unwrap();
                    group.shutdown();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
