#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//!
//! Implements the device side of the DFU protocol for a bootloader
//! that updates firmware over USB control transfers.
//!
//! ## About
//!
//! A DFU-capable device usually carries two programs: a large main
//! firmware, and a small bootloader. When the device is powered on,
//! the bootloader starts and either jumps to the main firmware or
//! stays resident and accepts a firmware update from the host.
//!
//! This library is the protocol engine of such a bootloader. It
//! receives an image in page-sized blocks, reassembles blocks that
//! arrive split across several control transactions, sequences
//! erase-before-write against the non-volatile memory controller, and
//! holds back the first program-memory page until the host declares
//! the image complete, so an interrupted update leaves the device in
//! a recoverable state.
//!
//! Two storage planes are served: program (application flash) memory
//! on interface alternate setting 0, and data EEPROM on alternate
//! setting 1.
//!
//! Actual code that erases, programs, or reads memory is not part of
//! the library and is provided through the [`Plane`] and [`EepromIO`]
//! traits. The same goes for the USB byte-level engine and descriptor
//! tables: a transport decodes control-transfer events, feeds them to
//! [`DFUBootloader`], and carries out replies through the
//! [`ControlPipe`] primitives.
//!
//! ### Supported operations
//!
//! * Write (host to device) - download command
//! * Read (device to host) - upload command
//! * Manifestation with a deferred page-0 commit
//!
//! ### Not supported operations
//!
//! * DFU_DETACH - the engine always runs in DFU mode; run-time
//!   detach/attach negotiation belongs to the application firmware.
//!
//! ### Limitations
//!
//! * The status reply always reports a zero poll timeout unless
//!   [`Config::poll_timeout_ms`] says otherwise; erase and program
//!   block the control pipe instead.
//!
//! * iString in `DFU_GETSTATUS` is always `0`. Vendor-specific string
//! error descriptions are not supported.
//!
//! ## DFU utilities
//!
//! There are many implementations of tools to flash USB devices
//! supporting the DFU protocol, for example:
//!
//! * [dfu](https://crates.io/crates/dfu) and [dfu-flasher](https://crates.io/crates/dfu-flasher)
//! * [dfu-programmer](https://dfu-programmer.github.io/)
//! * [dfu-util](http://dfu-util.sourceforge.net/)
//! * others
//!
//! ## Example
//!
//! The example below focuses on [`DFUBootloader`]; clock and USB
//! peripheral bring-up, interrupt wiring, and the boot-or-update
//! decision are not in the scope of the example.
//!
//! ```no_run
//! use usb_device::control::{Recipient, Request, RequestType};
//! use usb_device::UsbDirection;
//! use usbd_dfu_boot::*;
//!
//! // 16 KiB of application flash in 256-byte pages.
//! struct Flash {
//!     memory: [u8; 16 * 1024],
//! }
//!
//! impl Plane for Flash {
//!     fn page_size(&self) -> usize {
//!         256
//!     }
//!
//!     fn page_count(&self) -> usize {
//!         self.memory.len() / 256
//!     }
//!
//!     fn erase(&mut self, page: usize) -> Result<(), PlaneError> {
//!         // Send the page-erase command to the memory controller
//!         // and wait until it completes.
//!         let start = page * 256;
//!         self.memory[start..start + 256].fill(0xff);
//!         Ok(())
//!     }
//!
//!     fn program(&mut self, page: usize, data: &[u8]) -> Result<(), PlaneError> {
//!         // Load the page buffer and issue the write command.
//!         let start = page * 256;
//!         self.memory[start..start + data.len()].copy_from_slice(data);
//!         Ok(())
//!     }
//!
//!     fn read(&mut self, offset: usize, dest: &mut [u8]) -> Result<(), PlaneError> {
//!         dest.copy_from_slice(&self.memory[offset..offset + dest.len()]);
//!         Ok(())
//!     }
//! }
//!
//! // 1 KiB of EEPROM written in 32-byte atomic pages.
//! struct Eeprom {
//!     memory: [u8; 1024],
//! }
//!
//! impl EepromIO for Eeprom {
//!     fn page_size(&self) -> usize {
//!         32
//!     }
//!
//!     fn page_count(&self) -> usize {
//!         self.memory.len() / 32
//!     }
//!
//!     fn write_page(&mut self, page: usize, data: &[u8]) -> Result<(), PlaneError> {
//!         let start = page * 32;
//!         self.memory[start..start + data.len()].copy_from_slice(data);
//!         Ok(())
//!     }
//!
//!     fn read(&mut self, offset: usize, dest: &mut [u8]) -> Result<(), PlaneError> {
//!         dest.copy_from_slice(&self.memory[offset..offset + dest.len()]);
//!         Ok(())
//!     }
//! }
//!
//! // Endpoint 0 driver for the target, elided here.
//! struct Pipe;
//!
//! impl ControlPipe for Pipe {
//!     fn accept_out(&mut self, _max_len: usize) { /* arm EP0 OUT */ }
//!     fn send_in(&mut self, _data: &[u8]) { /* queue EP0 IN */ }
//!     fn ack_in(&mut self) { /* zero-length IN */ }
//!     fn ack_out(&mut self) { /* arm zero-length OUT */ }
//!     fn stall(&mut self) { /* stall EP0 */ }
//! }
//!
//! let flash = Flash { memory: [0xff; 16 * 1024] };
//! let eeprom = EepromPlane::new(Eeprom { memory: [0xff; 1024] }, 256);
//! let mut pipe = Pipe;
//!
//! let mut dfu = DFUBootloader::<_, _, 256>::new(flash, eeprom, Config::default());
//!
//! // The transport decodes each SETUP packet and hands it over.
//! let get_status = Request {
//!     direction: UsbDirection::In,
//!     request_type: RequestType::Class,
//!     recipient: Recipient::Interface,
//!     request: 0x03, // DFU_GETSTATUS
//!     value: 0,
//!     index: 0,
//!     length: 6,
//! };
//! dfu.on_setup(&mut pipe, &get_status);
//!
//! // The outer run loop resets the device once an update lands:
//! if dfu.reset_pending() {
//!     // detach, wait out the grace delay, pull the reset line
//! }
//! ```
//!

/// DFU protocol module
pub mod class;
pub mod pipe;
pub mod plane;

#[doc(inline)]
pub use crate::class::{Config, DFUBootloader};
#[doc(inline)]
pub use crate::pipe::ControlPipe;
#[doc(inline)]
pub use crate::plane::{EepromIO, EepromPlane, Plane, PlaneError, PlaneSelect};
