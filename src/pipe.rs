//! Control-endpoint transport contract.

/// Endpoint 0 primitives the protocol engine answers through.
///
/// The byte-level USB engine (packet reception, SETUP decoding, bus
/// signaling, descriptor tables) is not part of this crate. A
/// transport implements this trait, decodes control-transfer events,
/// and feeds them to [`DFUBootloader`](crate::DFUBootloader); the
/// engine replies with these five primitives.
///
/// The transport re-arms endpoint 0 for the next SETUP packet on its
/// own; a stall condition is cleared by the next SETUP as usual.
pub trait ControlPipe {
    /// Arm endpoint 0 to accept the next OUT data transaction.
    ///
    /// `max_len` is the number of bytes still expected for the current
    /// data stage; one transaction may deliver fewer.
    fn accept_out(&mut self, max_len: usize);

    /// Send `data` as the next IN data stage.
    ///
    /// An empty slice is a zero-length packet; in the upload direction
    /// it signals the final (short) block to the host.
    fn send_in(&mut self, data: &[u8]);

    /// Complete the status stage of a control write with a zero-length
    /// IN packet.
    fn ack_in(&mut self);

    /// Arm the zero-length OUT status stage of a control read.
    fn ack_out(&mut self);

    /// Stall endpoint 0, reporting failure of the current transfer.
    fn stall(&mut self);
}
