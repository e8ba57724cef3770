//! UDP collaborator boundary
//!
//! The network stack lives outside this core; the kernel routes socket
//! syscalls through a registered [`UdpStack`]. What the core owns is the
//! small process-wide socket-slot table: each slot ties a user-visible
//! descriptor to its owning process and, once bound, to the stack's own
//! socket id.

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::process::Pid;

/// Opaque socket id handed out by the stack.
pub type SockId = u32;

/// UDP stack contract. `recv` blocks inside the collaborator until a
/// datagram arrives.
pub trait UdpStack: Send + Sync {
    fn bind(&self, port: u16) -> Option<SockId>;

    fn sendto(&self, sock: SockId, dst_ip: u32, dst_port: u16, buf: &[u8]) -> KernelResult<usize>;

    /// Returns (bytes, source ip, source port).
    fn recv(&self, sock: SockId, buf: &mut [u8]) -> KernelResult<(usize, u32, u16)>;

    fn unbind(&self, sock: SockId);
}

static UDP: Mutex<Option<&'static dyn UdpStack>> = Mutex::new(None);

pub fn register_udp(stack: &'static dyn UdpStack) {
    *UDP.lock() = Some(stack);
}

pub fn udp() -> Option<&'static dyn UdpStack> {
    *UDP.lock()
}

// ---------------------------------------------------------------------------
// Socket slots
// ---------------------------------------------------------------------------

/// Process-wide socket descriptor capacity.
pub const MAX_SOCKETS: usize = 32;

#[derive(Clone, Copy)]
struct SocketSlot {
    owner: u32,
    bound: Option<SockId>,
}

static SOCKETS: Mutex<[Option<SocketSlot>; MAX_SOCKETS]> = Mutex::new([None; MAX_SOCKETS]);

/// Allocate a descriptor for `owner`. The slot starts unbound.
pub fn socket_create(owner: Pid) -> KernelResult<usize> {
    let mut slots = SOCKETS.lock();
    for (index, slot) in slots.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(SocketSlot {
                owner: owner.0,
                bound: None,
            });
            return Ok(index);
        }
    }
    Err(KernelError::ResourceExhausted { resource: "sockets" })
}

fn slot_for(owner: Pid, index: usize) -> KernelResult<SocketSlot> {
    SOCKETS
        .lock()
        .get(index)
        .copied()
        .flatten()
        .filter(|slot| slot.owner == owner.0)
        .ok_or(KernelError::NotFound { resource: "socket" })
}

/// Bind a descriptor to a UDP port through the collaborator.
pub fn socket_bind(owner: Pid, index: usize, port: u16) -> KernelResult<()> {
    let slot = slot_for(owner, index)?;
    if slot.bound.is_some() {
        return Err(KernelError::AlreadyExists { resource: "binding" });
    }
    let stack = udp().ok_or(KernelError::NotInitialized { subsystem: "udp" })?;
    let sock = stack.bind(port).ok_or(KernelError::ResourceExhausted {
        resource: "udp ports",
    })?;
    SOCKETS.lock()[index] = Some(SocketSlot {
        owner: owner.0,
        bound: Some(sock),
    });
    Ok(())
}

/// Stack-side id of a bound descriptor.
pub fn socket_stack_id(owner: Pid, index: usize) -> KernelResult<SockId> {
    slot_for(owner, index)?
        .bound
        .ok_or(KernelError::InvalidState {
            expected: "bound socket",
            actual: "unbound",
        })
}

/// Release a descriptor, unbinding it from the stack if needed.
pub fn socket_close(owner: Pid, index: usize) -> KernelResult<()> {
    let slot = slot_for(owner, index)?;
    if let (Some(sock), Some(stack)) = (slot.bound, udp()) {
        stack.unbind(sock);
    }
    SOCKETS.lock()[index] = None;
    Ok(())
}

#[cfg(test)]
pub(crate) fn reset_sockets() {
    let mut slots = SOCKETS.lock();
    for slot in slots.iter_mut() {
        *slot = None;
    }
    *UDP.lock() = None;
}
