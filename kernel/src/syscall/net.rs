//! UDP socket syscalls: thin routing into the network collaborator

use alloc::vec;

use super::{current, read_user_bytes, ret, validate_user_range, write_user_bytes};
use crate::arch::context::TrapFrame;
use crate::error::SyscallError;
use crate::net;

/// Per-datagram transfer cap.
const MAX_DGRAM: usize = 2048;

/// SOCKET: allocate an unbound socket descriptor.
pub fn sys_socket(frame: &mut TrapFrame) -> isize {
    let _ = frame;
    ret((|| {
        let process = current()?;
        let slot = net::socket_create(process.pid)?;
        Ok(slot)
    })())
}

/// BIND: bind descriptor EBX to UDP port ECX.
pub fn sys_bind(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        if frame.ecx > u16::MAX as u32 {
            return Err(SyscallError::InvalidArgument);
        }
        net::socket_bind(process.pid, frame.ebx as usize, frame.ecx as u16)?;
        Ok(0)
    })())
}

/// SENDTO: descriptor EBX, destination IP ECX, destination port EDX,
/// buffer ESI, length EDI. Returns bytes sent.
pub fn sys_sendto(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let (slot, dst_ip, dst_port) = (frame.ebx as usize, frame.ecx, frame.edx);
        let (buf_ptr, len) = (frame.esi, frame.edi);
        if dst_port > u16::MAX as u32 {
            return Err(SyscallError::InvalidArgument);
        }
        validate_user_range(buf_ptr, len)?;

        let sock = net::socket_stack_id(process.pid, slot)?;
        let stack = net::udp().ok_or(SyscallError::NotFound)?;

        let count = (len as usize).min(MAX_DGRAM);
        let mut bounce = vec![0u8; count];
        read_user_bytes(process, buf_ptr, &mut bounce)?;

        let sent = stack.sendto(sock, dst_ip, dst_port as u16, &bounce)?;
        Ok(sent)
    })())
}

/// RECVFROM: descriptor EBX, buffer ECX, capacity EDX; ESI/EDI, when
/// non-null, receive the source IP and port. Blocks in the collaborator
/// until a datagram arrives. Returns bytes received.
pub fn sys_recvfrom(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        let (slot, buf_ptr, max_len) = (frame.ebx as usize, frame.ecx, frame.edx);
        let (ip_ptr, port_ptr) = (frame.esi, frame.edi);
        validate_user_range(buf_ptr, max_len)?;
        if ip_ptr != 0 {
            validate_user_range(ip_ptr, 4)?;
        }
        if port_ptr != 0 {
            validate_user_range(port_ptr, 4)?;
        }

        let sock = net::socket_stack_id(process.pid, slot)?;
        let stack = net::udp().ok_or(SyscallError::NotFound)?;

        let count = (max_len as usize).min(MAX_DGRAM);
        let mut bounce = vec![0u8; count];
        let (received, src_ip, src_port) = stack.recv(sock, &mut bounce)?;

        write_user_bytes(process, buf_ptr, &bounce[..received])?;
        if ip_ptr != 0 {
            write_user_bytes(process, ip_ptr, &src_ip.to_le_bytes())?;
        }
        if port_ptr != 0 {
            write_user_bytes(process, port_ptr, &(src_port as u32).to_le_bytes())?;
        }
        Ok(received)
    })())
}

/// CLOSESOCK: release descriptor EBX, unbinding it from the stack.
pub fn sys_closesock(frame: &mut TrapFrame) -> isize {
    ret((|| {
        let process = current()?;
        net::socket_close(process.pid, frame.ebx as usize)?;
        Ok(0)
    })())
}
