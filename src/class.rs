use core::cmp::min;
use usb_device::control::{Recipient, Request, RequestType};

use crate::pipe::ControlPipe;
use crate::plane::{Plane, PlaneError, PlaneSelect};

#[allow(dead_code)]
const DFU_DETACH: u8 = 0x00;
const DFU_DNLOAD: u8 = 0x01;
const DFU_UPLOAD: u8 = 0x02;
const DFU_GETSTATUS: u8 = 0x03;
const DFU_CLRSTATUS: u8 = 0x04;
const DFU_GETSTATE: u8 = 0x05;
const DFU_ABORT: u8 = 0x06;

/// Erased-flash pattern. A block shorter than the page size programs a
/// full page padded with this value.
const FILL_PATTERN: u8 = 0xff;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum DFUState {
    /// Device is operating in the DFU mode and is waiting for requests.
    DfuIdle = 2,
    /// Device is receiving a block and programming it into its nonvolatile memories.
    DfuDnBusy = 4,
    /// Device is processing a download operation. Expecting DFU_DNLOAD requests.
    DfuDnloadIdle = 5,
    /// Device has received the final block of firmware from the host and is waiting for receipt of DFU_GETSTATUS to begin the Manifestation phase.
    DfuManifestSync = 6,
    /// Device has programmed its memories and is waiting for a USB reset or a power on reset.
    DfuManifestWaitReset = 8,
    /// The device is processing an upload operation. Expecting DFU_UPLOAD requests.
    DfuUploadIdle = 9,
    /// An error has occurred. Awaiting the DFU_CLRSTATUS request.
    DfuError = 10,
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum DFUStatusCode {
    /// No error condition is present.
    OK = 0x00,
    /// Memory erase function failed.
    ErrErase = 0x04,
    /// Program memory function failed.
    ErrProg = 0x06,
    /// Cannot program memory due to received address that is out of range.
    ErrAddress = 0x08,
    /// Received DFU_UPLOAD the device cannot satisfy with its block buffer.
    ErrNotdone = 0x09,
    /// Something went wrong, but the device does not know what it was.
    ErrUnknown = 0x0E,
    /// Device stalled an unexpected request.
    ErrStalledPkt = 0x0F,
}

impl From<PlaneError> for DFUStatusCode {
    fn from(e: PlaneError) -> Self {
        match e {
            PlaneError::Address => DFUStatusCode::ErrAddress,
            PlaneError::Erase => DFUStatusCode::ErrErase,
            PlaneError::Program => DFUStatusCode::ErrProg,
        }
    }
}

/// Deployment configuration for [`DFUBootloader`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Config {
    /// Hold the first program-memory page in RAM until the host
    /// signals the end of the image.
    ///
    /// Page 0 carries the reset vector or load signature the
    /// bootloader inspects on the next power-up to decide whether to
    /// enter update mode. Committing it last means an interrupted
    /// update leaves the page blank and the update can be retried.
    /// When disabled, page 0 commits immediately like any other page.
    pub defer_page_zero: bool,

    /// bwPollTimeout value reported by `DFU_GETSTATUS`, in
    /// milliseconds. Only the low 24 bits reach the wire.
    ///
    /// Defaults to zero: erase and program block the control pipe
    /// instead, and the host is expected to tolerate the latency.
    pub poll_timeout_ms: u32,

    /// Answer `DFU_UPLOAD` (read firmware back to the host) requests.
    ///
    /// When disabled, uploads are rejected like any unrecognized
    /// request.
    pub has_upload: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defer_page_zero: true,
            poll_timeout_ms: 0,
            has_upload: true,
        }
    }
}

/// The live protocol session. One exists per device; bus reset, plane
/// selection, abort, and clear-status all rebuild it. The selected
/// plane and a raised reset signal survive the teardown.
#[derive(Clone, Copy)]
struct Session {
    state: DFUState,
    status: DFUStatusCode,
    plane: PlaneSelect,
    /// Write cursor into the transfer buffer, `0..=block_len`.
    write_head: usize,
    /// Page index of the block being received.
    block_page: usize,
    /// Declared wLength of the block being received.
    block_len: usize,
    /// Upload cursor, a byte offset into program memory. Advances
    /// monotonically; only a session teardown rewinds it.
    read_head: usize,
    reset_pending: bool,
}

impl Session {
    fn new(plane: PlaneSelect) -> Self {
        Self {
            state: DFUState::DfuIdle,
            status: DFUStatusCode::OK,
            plane,
            write_head: 0,
            block_page: 0,
            block_len: 0,
            read_head: 0,
            reset_pending: false,
        }
    }

    fn advance(&mut self, state: DFUState) {
        self.state = state;
    }

    fn error(&mut self, status: DFUStatusCode) {
        self.status = status;
        self.state = DFUState::DfuError;
    }

    fn state(&self) -> DFUState {
        self.state
    }
}

/// DFU bootloader protocol engine.
///
/// Owns the two storage planes and the protocol session, and is driven
/// by control-transfer events decoded by the transport. `CAP` sizes
/// the block transfer buffer and must be at least the larger of the
/// two planes' page sizes.
pub struct DFUBootloader<F, E, const CAP: usize> {
    flash: F,
    eeprom: E,
    config: Config,
    session: Session,
    buffer: [u8; CAP],
    shadow: Option<[u8; CAP]>,
}

impl<F: Plane, E: Plane, const CAP: usize> DFUBootloader<F, E, CAP> {
    /// Creates a bootloader over a program-memory plane and an EEPROM
    /// plane, with program memory selected.
    pub fn new(flash: F, eeprom: E, config: Config) -> Self {
        debug_assert!(flash.page_size() > 0 && flash.page_size() <= CAP);
        debug_assert!(eeprom.page_size() > 0 && eeprom.page_size() <= CAP);
        Self {
            flash,
            eeprom,
            config,
            session: Session::new(PlaneSelect::Program),
            buffer: [FILL_PATTERN; CAP],
            shadow: None,
        }
    }

    /// Access the program-memory plane.
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Access the EEPROM plane.
    pub fn eeprom(&self) -> &E {
        &self.eeprom
    }

    /// True once a downloaded image has been manifested and the device
    /// should detach from the bus and reset.
    ///
    /// Raised when `DFU_GETSTATUS` moves the session out of
    /// manifest-sync; stays raised until the surrounding run loop
    /// performs the reset.
    pub fn reset_pending(&self) -> bool {
        self.session.reset_pending
    }

    /// Handles a SETUP packet addressed to the DFU interface.
    ///
    /// Completes synchronously for status and state queries; arms a
    /// data stage for downloads and uploads, to be continued by
    /// [`on_out_completion`](DFUBootloader::on_out_completion) and
    /// [`on_in_completion`](DFUBootloader::on_in_completion).
    pub fn on_setup<P: ControlPipe>(&mut self, pipe: &mut P, req: &Request) {
        if req.request_type != RequestType::Class {
            return;
        }

        if req.recipient != Recipient::Interface {
            return;
        }

        match req.request {
            DFU_DNLOAD => self.download(pipe, req),
            DFU_UPLOAD if self.config.has_upload => self.upload(pipe, req),
            DFU_GETSTATUS => self.get_status(pipe, req),
            DFU_GETSTATE => self.get_state(pipe, req),
            DFU_ABORT | DFU_CLRSTATUS => self.abort(pipe),
            _ => {
                self.session.error(DFUStatusCode::ErrStalledPkt);
                pipe.stall();
            }
        }
    }

    /// Handles completion of one OUT data transaction carrying `data`.
    ///
    /// A block may arrive split across several transactions; bytes
    /// accumulate in the transfer buffer until the declared length is
    /// reached, then the page commits.
    pub fn on_out_completion<P: ControlPipe>(&mut self, pipe: &mut P, data: &[u8]) {
        if self.session.state() != DFUState::DfuDnBusy {
            return;
        }

        let head = self.session.write_head;

        // reject before copying: a block must not outgrow its declared length
        if data.len() > self.session.block_len - head {
            self.session.error(DFUStatusCode::ErrAddress);
            pipe.stall();
            return;
        }

        self.buffer[head..head + data.len()].copy_from_slice(data);
        self.session.write_head = head + data.len();

        if self.session.write_head == self.session.block_len {
            self.commit_block(pipe);
        } else {
            pipe.accept_out(self.session.block_len - self.session.write_head);
        }
    }

    /// Handles completion of an IN data stage.
    pub fn on_in_completion<P: ControlPipe>(&mut self, pipe: &mut P) {
        // an upload leaves its status stage to be armed here; the
        // session stays ready for further DFU_UPLOAD requests
        if self.session.state() == DFUState::DfuUploadIdle {
            pipe.ack_out();
        }
    }

    /// Handles a `SET_INTERFACE` alternate-setting change.
    ///
    /// Alternate setting 0 selects program memory, 1 selects EEPROM.
    /// Values outside the descriptor table are ignored.
    pub fn on_alt_setting_changed(&mut self, alt: u8) {
        match alt {
            0 => self.select(PlaneSelect::Program),
            1 => self.select(PlaneSelect::Eeprom),
            _ => {}
        }
    }

    /// Switches the active plane, abandoning any transfer in progress.
    pub fn select(&mut self, plane: PlaneSelect) {
        self.session_reset();
        self.session.plane = plane;
    }

    /// Handles a USB bus reset.
    ///
    /// Enumeration returns the interface to alternate setting 0, so
    /// the session restarts against program memory.
    pub fn on_bus_reset(&mut self) {
        self.session_reset();
        self.session.plane = PlaneSelect::Program;
    }

    fn session_reset(&mut self) {
        let plane = self.session.plane;
        let reset_pending = self.session.reset_pending;
        self.session = Session::new(plane);
        self.session.reset_pending = reset_pending;
        self.buffer.fill(FILL_PATTERN);
        self.shadow = None;
    }

    fn active_page_size(&self) -> usize {
        match self.session.plane {
            PlaneSelect::Program => self.flash.page_size(),
            PlaneSelect::Eeprom => self.eeprom.page_size(),
        }
    }

    fn active_page_count(&self) -> usize {
        match self.session.plane {
            PlaneSelect::Program => self.flash.page_count(),
            PlaneSelect::Eeprom => self.eeprom.page_count(),
        }
    }

    fn active_plane(&mut self) -> &mut dyn Plane {
        match self.session.plane {
            PlaneSelect::Program => &mut self.flash as &mut dyn Plane,
            PlaneSelect::Eeprom => &mut self.eeprom as &mut dyn Plane,
        }
    }

    fn download<P: ControlPipe>(&mut self, pipe: &mut P, req: &Request) {
        let initial_state = self.session.state();

        if initial_state != DFUState::DfuIdle && initial_state != DFUState::DfuDnloadIdle {
            self.session.error(DFUStatusCode::ErrStalledPkt);
            pipe.stall();
            return;
        }

        // wLength == 0 signals the end of the image
        if req.length == 0 {
            self.session.advance(DFUState::DfuManifestSync);
            pipe.ack_in();
            return;
        }

        let len = req.length as usize;
        let page = req.value as usize;

        self.session.write_head = 0;
        if len > self.active_page_size() {
            self.session.error(DFUStatusCode::ErrUnknown);
            pipe.stall();
            return;
        }
        if page >= self.active_page_count() {
            self.session.error(DFUStatusCode::ErrAddress);
            pipe.stall();
            return;
        }

        // open the erase/program cycle before any data arrives
        if let Err(e) = self.active_plane().erase(page) {
            self.session.error(e.into());
            pipe.stall();
            return;
        }

        self.session.block_page = page;
        self.session.block_len = len;
        self.session.advance(DFUState::DfuDnBusy);
        pipe.accept_out(len);
    }

    fn commit_block<P: ControlPipe>(&mut self, pipe: &mut P) {
        let page = self.session.block_page;

        if page == 0 && self.config.defer_page_zero && self.session.plane == PlaneSelect::Program {
            // held back until the image is complete; the page itself
            // stays erased and keeps signaling "enter bootloader"
            self.shadow = Some(self.buffer);
        } else {
            let Self {
                flash,
                eeprom,
                session,
                buffer,
                ..
            } = self;
            let plane: &mut dyn Plane = match session.plane {
                PlaneSelect::Program => flash as &mut dyn Plane,
                PlaneSelect::Eeprom => eeprom as &mut dyn Plane,
            };

            let page_size = plane.page_size();
            if let Err(e) = plane.program(page, &buffer[..page_size]) {
                session.error(e.into());
                pipe.stall();
                return;
            }
        }

        self.buffer.fill(FILL_PATTERN);
        self.session.write_head = 0;
        self.session.advance(DFUState::DfuDnloadIdle);
        pipe.ack_in();
    }

    fn upload<P: ControlPipe>(&mut self, pipe: &mut P, req: &Request) {
        let page = req.value as usize;

        // past the last program page: a zero-length block ends the image
        if page >= self.flash.page_count() {
            pipe.send_in(&[]);
            return;
        }

        let len = req.length as usize;
        if len > CAP {
            self.session.error(DFUStatusCode::ErrNotdone);
            pipe.stall();
            return;
        }

        let Self {
            flash,
            session,
            buffer,
            ..
        } = self;
        match flash.read(session.read_head, &mut buffer[..len]) {
            Ok(()) => {
                session.read_head += len;
                session.advance(DFUState::DfuUploadIdle);
                pipe.send_in(&buffer[..len]);
            }
            Err(e) => {
                session.error(e.into());
                pipe.stall();
            }
        }
    }

    fn get_status<P: ControlPipe>(&mut self, pipe: &mut P, req: &Request) {
        if self.session.state() == DFUState::DfuManifestSync {
            match self.commit_deferred() {
                Ok(()) => {
                    self.session.advance(DFUState::DfuManifestWaitReset);
                    self.session.reset_pending = true;
                }
                Err(status) => self.session.error(status),
            }
        }

        let response = self.status_response();
        let len = min(req.length as usize, response.len());
        pipe.send_in(&response[..len]);
        pipe.ack_out();
    }

    fn commit_deferred(&mut self) -> Result<(), DFUStatusCode> {
        if let Some(shadow) = self.shadow.take() {
            let page_size = self.flash.page_size();
            self.flash
                .program(0, &shadow[..page_size])
                .map_err(DFUStatusCode::from)?;
        }
        Ok(())
    }

    fn status_response(&self) -> [u8; 6] {
        let timeout = self.config.poll_timeout_ms;
        [
            // bStatus
            self.session.status as u8,
            // bwPollTimeout
            (timeout & 0xff) as u8,
            ((timeout >> 8) & 0xff) as u8,
            ((timeout >> 16) & 0xff) as u8,
            // bState
            self.session.state as u8,
            // iString: Index of status description in string table.
            0,
        ]
    }

    fn get_state<P: ControlPipe>(&mut self, pipe: &mut P, req: &Request) {
        // return current state, without any state transition
        let response = [self.session.state as u8];
        let len = min(req.length as usize, response.len());
        pipe.send_in(&response[..len]);
        pipe.ack_out();
    }

    fn abort<P: ControlPipe>(&mut self, pipe: &mut P) {
        self.session_reset();
        pipe.ack_in();
    }
}
