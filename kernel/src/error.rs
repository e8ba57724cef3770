//! Error types for the Ember kernel
//!
//! Kernel-internal primitives return structured errors; the syscall
//! boundary collapses every one of them into the single `-1` convention
//! of the user ABI. The variants carry enough context for the log line at
//! the point of conversion to be useful.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Memory-related errors
    OutOfMemory {
        requested: usize,
    },
    InvalidAddress {
        addr: u32,
    },
    UnmappedMemory {
        addr: u32,
    },

    /// Process-related errors
    ProcessNotFound {
        pid: u32,
    },
    NoChildren,
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Generic errors
    InvalidArgument {
        what: &'static str,
    },
    ResourceExhausted {
        resource: &'static str,
    },
    PermissionDenied {
        operation: &'static str,
    },
    AlreadyExists {
        resource: &'static str,
    },
    NotFound {
        resource: &'static str,
    },
    NotInitialized {
        subsystem: &'static str,
    },
    /// Operation would block and the caller asked not to
    WouldBlock,
    /// A blocked operation was cut short by a pending signal
    Interrupted,
    /// Pipe write with no remaining readers
    BrokenPipe,

    /// Filesystem collaborator errors
    Fs(FsError),
}

/// Frame allocator errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    /// No run of free frames satisfies the request
    OutOfMemory,
    /// Frame number outside the managed range
    InvalidFrame,
    /// Zero-length or over-large request
    InvalidSize,
}

/// System call errors
///
/// Every variant maps to `-1` at the ABI; the distinctions exist for
/// kernel-internal callers and for the test suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall { nr: usize },
    InvalidPointer { addr: u32 },
    InvalidArgument,
    BadFileDescriptor,
    OutOfMemory,
    NotFound,
    AlreadyExists,
    NoChildren,
    WouldBlock,
    Interrupted,
    BrokenPipe,
    PermissionDenied,
}

/// Filesystem-specific errors surfaced by the VFS collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// File or directory not found
    NotFound,
    /// Path already exists
    AlreadyExists,
    /// Target is not a directory
    NotADirectory,
    /// Target is a directory (when a file was expected)
    IsADirectory,
    /// Directory is not empty
    DirectoryNotEmpty,
    /// Invalid path format
    InvalidPath,
    /// Filesystem is read-only
    ReadOnly,
    /// I/O error during the operation
    IoError,
    /// Operation not supported on this node type
    NotSupported,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory: requested {} bytes", requested)
            }
            Self::InvalidAddress { addr } => write!(f, "invalid address 0x{:08x}", addr),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at 0x{:08x}", addr),
            Self::ProcessNotFound { pid } => write!(f, "process {} not found", pid),
            Self::NoChildren => write!(f, "no child processes"),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {}, got {}", expected, actual)
            }
            Self::InvalidArgument { what } => write!(f, "invalid argument: {}", what),
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {}", resource),
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied for {}", operation)
            }
            Self::AlreadyExists { resource } => write!(f, "{} already exists", resource),
            Self::NotFound { resource } => write!(f, "{} not found", resource),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
            Self::WouldBlock => write!(f, "operation would block"),
            Self::Interrupted => write!(f, "interrupted by signal"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::Fs(e) => write!(f, "filesystem error: {:?}", e),
        }
    }
}

impl From<FrameAllocatorError> for KernelError {
    fn from(err: FrameAllocatorError) -> Self {
        match err {
            FrameAllocatorError::OutOfMemory => Self::OutOfMemory { requested: 0 },
            FrameAllocatorError::InvalidFrame => Self::InvalidArgument {
                what: "frame number",
            },
            FrameAllocatorError::InvalidSize => Self::InvalidArgument {
                what: "frame count",
            },
        }
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::Fs(err)
    }
}

impl From<KernelError> for SyscallError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::OutOfMemory { .. } | KernelError::ResourceExhausted { .. } => {
                Self::OutOfMemory
            }
            KernelError::InvalidAddress { addr } | KernelError::UnmappedMemory { addr } => {
                Self::InvalidPointer { addr }
            }
            KernelError::ProcessNotFound { .. } | KernelError::NotFound { .. } => Self::NotFound,
            KernelError::NoChildren => Self::NoChildren,
            KernelError::AlreadyExists { .. } => Self::AlreadyExists,
            KernelError::WouldBlock => Self::WouldBlock,
            KernelError::Interrupted => Self::Interrupted,
            KernelError::BrokenPipe => Self::BrokenPipe,
            KernelError::PermissionDenied { .. } => Self::PermissionDenied,
            KernelError::Fs(FsError::NotFound) => Self::NotFound,
            KernelError::Fs(FsError::AlreadyExists) => Self::AlreadyExists,
            _ => Self::InvalidArgument,
        }
    }
}
