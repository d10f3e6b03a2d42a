//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the
//! underlying communication channel (TCP, UART, a unit-test mock, ...),
//! allowing the session engine to be hardware and network-stack agnostic.
//!
//! Unlike a typical embedded Rust transport trait, this one is **synchronous
//! and polling-based**, not `async fn`. The engine owns no executor and never
//! suspends (spec §5): it calls `send`/`recv` and reacts to `Busy` (retry
//! later) or `Pending` (in-flight, completion signalled out of band) the way
//! a C SDK's poll loop would. This mirrors the contract in spec §6.2, which
//! an `embedded-io-async`/`embassy-net` socket cannot satisfy directly — a
//! thin synchronous adapter sits in front of whatever async stack the
//! embedding firmware actually uses.

/// A placeholder error type used in contexts where the actual transport error
/// is not yet known, such as in codec functions that must return a `Result`
/// compatible with the session's error type.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorPlaceHolder;

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {}

impl TransportError for ErrorPlaceHolder {}

/// Non-terminal or terminal status returned by transport operations.
///
/// `Busy` and `Pending` are not errors: `Busy` means "retry the same call
/// later", `Pending` means "accepted, completion will be signalled
/// out-of-band" (spec §5: "The engine does not spin").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportStatus {
    Ok,
    HostUnavailable,
    HwFailure,
    SwFailure,
    OutOfMemory,
    Busy,
    Pending,
}

impl TransportError for TransportStatus {}

/// A transport-owned send/receive buffer handle.
///
/// Always `'static`: spec §6.2 licenses "a static arena ... if bounded", and
/// that shape is load-bearing here, not just an implementation choice. If
/// `alloc_send_buf` returned a buffer borrowed from `&mut self`, holding it
/// alive across the subsequent `send` call (which also needs `&mut self`)
/// would be two overlapping mutable borrows of the same transport — rejected
/// by the borrow checker. A `'static` buffer (backed by a fixed arena the
/// transport owns and hands out by index/flag, not by borrow) decouples the
/// buffer's lifetime from the transport's own `&mut self` calls, which is
/// what lets `alloc -> write -> send -> free` compose at all.
pub struct SendBuf {
    pub data: &'static mut [u8],
}

/// Outcome of a `recv` poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecvOutcome {
    /// Data is ready; the caller's buffer now holds `len` valid bytes.
    Ready(usize),
    /// Nothing is ready yet; not an error.
    Passed,
}

/// The contract the session engine requires of its transport (spec §6.2, C8).
///
/// Every method is scoped to a single session: the engine assumes it is the
/// transport's only caller. `recv`/`alloc_recv_buf`/`free_recv_buf` are
/// optional — a callback-driven transport (e.g. an LwIP `recv` callback, spec
/// §9 OQ-5) can leave them at their default and instead push bytes into the
/// engine via `Session::process_packet`.
pub trait MqttTransport {
    type Error: TransportError;

    /// Begins connecting to `address`. May return before the connection is
    /// fully established: in that case the transport must report
    /// `connected() == false` and later flip it to `true` out-of-band. The
    /// engine sequences the initial CONNECT packet off of that flag plus its
    /// own deferred-connect marker.
    fn open_conn(&mut self, address: &str, port: u16) -> Result<(), Self::Error>;

    /// Closes the connection. Idempotent.
    fn close_conn(&mut self) -> Result<(), Self::Error>;

    /// True once the underlying connection is fully established.
    fn connected(&self) -> bool;

    /// Requests a send buffer of at least `len` bytes. The returned buffer is
    /// scoped to a single `send` call and must be released via
    /// `free_send_buf` on every exit path, success or failure.
    fn alloc_send_buf(&mut self, len: usize) -> Result<SendBuf, Self::Error>;

    /// Releases a buffer obtained from `alloc_send_buf`.
    fn free_send_buf(&mut self, buf: SendBuf);

    /// Sends the first `len` bytes of `buf.data`. May return `Busy` (retry
    /// later) rather than blocking.
    fn send(&mut self, buf: &SendBuf, len: usize) -> Result<(), Self::Error>;

    /// Requests a receive buffer of at least `hint` bytes. Optional: a
    /// transport that pushes bytes via `process_packet` instead of polling
    /// need not implement this (default returns `OutOfMemory`-shaped error by
    /// way of `Self::Error`, which callers ignore because they never call it
    /// without first checking transport capability).
    fn alloc_recv_buf(&mut self, hint: usize) -> Result<SendBuf, Self::Error> {
        let _ = hint;
        Err(self.unsupported_error())
    }

    /// Releases a buffer obtained from `alloc_recv_buf`.
    fn free_recv_buf(&mut self, buf: SendBuf) {
        let _ = buf;
    }

    /// Polls for inbound data. A zero-length read indicates peer close and
    /// must be reported as `HostUnavailable`-shaped, never as `Ready(0)`
    /// (spec §6.2: "A zero-length read is treated as peer close").
    fn recv(&mut self, buf: &mut SendBuf) -> Result<RecvOutcome, Self::Error> {
        let _ = buf;
        Ok(RecvOutcome::Passed)
    }

    /// Used by the two default methods above to report "this transport does
    /// not implement polling recv". Transports that only support the
    /// `process_packet` push model can return any stable error value here.
    fn unsupported_error(&self) -> Self::Error;
}
