#![allow(dead_code)]

use usb_device::control::{Recipient, Request, RequestType};
use usb_device::UsbDirection;

use usbd_dfu_boot::*;

use super::mockpipe::{Action, MockPipe};

// State
pub const DFU_IDLE: u8 = 2;
pub const DFU_DN_BUSY: u8 = 4;
pub const DFU_DNLOAD_IDLE: u8 = 5;
pub const DFU_MANIFEST_SYNC: u8 = 6;
pub const DFU_MANIFEST_WAIT_RESET: u8 = 8;
pub const DFU_UPLOAD_IDLE: u8 = 9;
pub const DFU_ERROR: u8 = 10;

// Status
pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERR_ERASE: u8 = 0x04;
pub const STATUS_ERR_PROG: u8 = 0x06;
pub const STATUS_ERR_ADDRESS: u8 = 0x08;
pub const STATUS_ERR_NOTDONE: u8 = 0x09;
pub const STATUS_ERR_UNKNOWN: u8 = 0x0E;
pub const STATUS_ERR_STALLED_PKT: u8 = 0x0F;

// Requests
pub const DFU_DNLOAD: u8 = 0x01;
pub const DFU_UPLOAD: u8 = 0x02;
pub const DFU_GETSTATUS: u8 = 0x03;
pub const DFU_CLRSTATUS: u8 = 0x04;
pub const DFU_GETSTATE: u8 = 0x05;
pub const DFU_ABORT: u8 = 0x06;

pub const PAGE_SIZE: usize = 256;
pub const PAGE_COUNT: usize = 64;

pub const EE_SUB_SIZE: usize = 32;
pub const EE_SUB_COUNT: usize = 32;

/// Program-memory fake: erase/program units of [`PAGE_SIZE`] bytes,
/// with hooks to make individual operations fail.
pub struct RamFlash {
    pub memory: Vec<u8>,
    pub erased: Vec<usize>,
    pub programmed: Vec<usize>,
    pub overrides: FlashOverride,
}

#[derive(Default)]
pub struct FlashOverride {
    pub erase: Option<fn(&mut RamFlash, usize) -> Result<(), PlaneError>>,
    pub program: Option<fn(&mut RamFlash, usize, &[u8]) -> Result<(), PlaneError>>,
}

impl RamFlash {
    pub fn new() -> Self {
        Self {
            memory: vec![0xff; PAGE_SIZE * PAGE_COUNT],
            erased: Vec::new(),
            programmed: Vec::new(),
            overrides: FlashOverride::default(),
        }
    }

    // Initialize memory as: [0,0, 1,0, 2,0, ... 255,0, 0,1, ...]
    pub fn patterned() -> Self {
        let mut flash = Self::new();
        for (i, v) in flash.memory.iter_mut().enumerate() {
            if i & 1 == 1 {
                *v = ((i >> 9) & 0xff) as u8;
            } else {
                *v = ((i >> 1) & 0xff) as u8;
            }
        }
        flash
    }

    pub fn page(&self, page: usize) -> &[u8] {
        &self.memory[page * PAGE_SIZE..(page + 1) * PAGE_SIZE]
    }
}

impl Plane for RamFlash {
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn page_count(&self) -> usize {
        PAGE_COUNT
    }

    fn erase(&mut self, page: usize) -> Result<(), PlaneError> {
        if let Some(f) = self.overrides.erase {
            return f(self, page);
        }
        if page >= PAGE_COUNT {
            return Err(PlaneError::Address);
        }
        self.memory[page * PAGE_SIZE..(page + 1) * PAGE_SIZE].fill(0xff);
        self.erased.push(page);
        Ok(())
    }

    fn program(&mut self, page: usize, data: &[u8]) -> Result<(), PlaneError> {
        if let Some(f) = self.overrides.program {
            return f(self, page, data);
        }
        if page >= PAGE_COUNT {
            return Err(PlaneError::Address);
        }
        assert_eq!(data.len(), PAGE_SIZE);
        assert!(self.erased.contains(&page), "program without erase");
        self.memory[page * PAGE_SIZE..(page + 1) * PAGE_SIZE].copy_from_slice(data);
        self.programmed.push(page);
        Ok(())
    }

    fn read(&mut self, offset: usize, dest: &mut [u8]) -> Result<(), PlaneError> {
        if offset + dest.len() > self.memory.len() {
            return Err(PlaneError::Address);
        }
        dest.copy_from_slice(&self.memory[offset..offset + dest.len()]);
        Ok(())
    }
}

/// EEPROM fake: [`EE_SUB_COUNT`] atomic pages of [`EE_SUB_SIZE`]
/// bytes, recording the order of sub-page writes.
pub struct RamEeprom {
    pub memory: Vec<u8>,
    pub writes: Vec<usize>,
    pub fail_page: Option<usize>,
}

impl RamEeprom {
    pub fn new() -> Self {
        Self {
            memory: vec![0xff; EE_SUB_SIZE * EE_SUB_COUNT],
            writes: Vec::new(),
            fail_page: None,
        }
    }
}

impl EepromIO for RamEeprom {
    fn page_size(&self) -> usize {
        EE_SUB_SIZE
    }

    fn page_count(&self) -> usize {
        EE_SUB_COUNT
    }

    fn write_page(&mut self, page: usize, data: &[u8]) -> Result<(), PlaneError> {
        if self.fail_page == Some(page) {
            return Err(PlaneError::Program);
        }
        if page >= EE_SUB_COUNT {
            return Err(PlaneError::Address);
        }
        assert_eq!(data.len(), EE_SUB_SIZE);
        self.memory[page * EE_SUB_SIZE..(page + 1) * EE_SUB_SIZE].copy_from_slice(data);
        self.writes.push(page);
        Ok(())
    }

    fn read(&mut self, offset: usize, dest: &mut [u8]) -> Result<(), PlaneError> {
        if offset + dest.len() > self.memory.len() {
            return Err(PlaneError::Address);
        }
        dest.copy_from_slice(&self.memory[offset..offset + dest.len()]);
        Ok(())
    }
}

pub type TestBoot = DFUBootloader<RamFlash, EepromPlane<RamEeprom>, PAGE_SIZE>;

pub fn class_out(request: u8, value: u16, length: u16) -> Request {
    Request {
        direction: UsbDirection::Out,
        request_type: RequestType::Class,
        recipient: Recipient::Interface,
        request,
        value,
        index: 0,
        length,
    }
}

pub fn class_in(request: u8, value: u16, length: u16) -> Request {
    Request {
        direction: UsbDirection::In,
        request_type: RequestType::Class,
        recipient: Recipient::Interface,
        request,
        value,
        index: 0,
        length,
    }
}

/// Expected `DFU_GETSTATUS` reply.
pub fn status(status: u8, poll_timeout: u32, state: u8) -> [u8; 6] {
    let t = poll_timeout.to_le_bytes();
    [status, t[0], t[1], t[2], state, 0]
}

/// A bootloader wired to RAM-backed planes and a recording pipe.
pub struct Dev {
    pub dfu: TestBoot,
    pub pipe: MockPipe,
}

impl Dev {
    pub fn new() -> Self {
        Self::build(RamFlash::new(), RamEeprom::new(), Config::default())
    }

    pub fn patterned() -> Self {
        Self::build(RamFlash::patterned(), RamEeprom::new(), Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(RamFlash::new(), RamEeprom::new(), config)
    }

    pub fn build(flash: RamFlash, eeprom: RamEeprom, config: Config) -> Self {
        Self {
            dfu: DFUBootloader::new(flash, EepromPlane::new(eeprom, PAGE_SIZE), config),
            pipe: MockPipe::new(),
        }
    }

    /// One DNLOAD control write, data delivered in `chunk`-byte
    /// transactions.
    pub fn download(&mut self, block: u16, data: &[u8], chunk: usize) -> Vec<Action> {
        self.dfu
            .on_setup(&mut self.pipe, &class_out(DFU_DNLOAD, block, data.len() as u16));
        for part in data.chunks(chunk) {
            self.dfu.on_out_completion(&mut self.pipe, part);
        }
        self.pipe.take()
    }

    /// The zero-length DNLOAD ending the image.
    pub fn manifest(&mut self) -> Vec<Action> {
        self.dfu
            .on_setup(&mut self.pipe, &class_out(DFU_DNLOAD, 0, 0));
        self.pipe.take()
    }

    pub fn upload(&mut self, block: u16, length: u16) -> Vec<Action> {
        self.dfu
            .on_setup(&mut self.pipe, &class_in(DFU_UPLOAD, block, length));
        self.pipe.take()
    }

    pub fn get_status(&mut self) -> Vec<Action> {
        self.dfu
            .on_setup(&mut self.pipe, &class_in(DFU_GETSTATUS, 0, 6));
        self.pipe.take()
    }

    /// `DFU_GETSTATUS` reply bytes.
    pub fn status_bytes(&mut self) -> [u8; 6] {
        let actions = self.get_status();
        let data = MockPipe::in_data(&actions).expect("status reply");
        data.try_into().expect("six status bytes")
    }

    /// `DFU_GETSTATE` reply byte.
    pub fn state_byte(&mut self) -> u8 {
        self.dfu
            .on_setup(&mut self.pipe, &class_in(DFU_GETSTATE, 0, 1));
        let actions = self.pipe.take();
        MockPipe::in_data(&actions).expect("state reply")[0]
    }

    pub fn abort(&mut self) -> Vec<Action> {
        self.dfu.on_setup(&mut self.pipe, &class_out(DFU_ABORT, 0, 0));
        self.pipe.take()
    }

    pub fn clear_status(&mut self) -> Vec<Action> {
        self.dfu
            .on_setup(&mut self.pipe, &class_out(DFU_CLRSTATUS, 0, 0));
        self.pipe.take()
    }
}
