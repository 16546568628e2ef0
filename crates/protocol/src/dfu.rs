//! DFU 1.1 class definitions
//!
//! Status report decoding and the functional descriptor fields the firmware
//! update task needs. Layouts follow the USB Device Firmware Upgrade
//! Specification, Revision 1.1.

use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Length of a DFU_GETSTATUS response
pub const DFU_STATUS_LEN: usize = 6;

/// bStatus values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuStatusCode {
    Ok = 0x00,
    ErrTarget = 0x01,
    ErrFile = 0x02,
    ErrWrite = 0x03,
    ErrErase = 0x04,
    ErrCheckErased = 0x05,
    ErrProg = 0x06,
    ErrVerify = 0x07,
    ErrAddress = 0x08,
    ErrNotDone = 0x09,
    ErrFirmware = 0x0a,
    ErrVendor = 0x0b,
    ErrUsbr = 0x0c,
    ErrPor = 0x0d,
    ErrUnknown = 0x0e,
    ErrStalledPkt = 0x0f,
}

impl TryFrom<u8> for DfuStatusCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        let code = match value {
            0x00 => DfuStatusCode::Ok,
            0x01 => DfuStatusCode::ErrTarget,
            0x02 => DfuStatusCode::ErrFile,
            0x03 => DfuStatusCode::ErrWrite,
            0x04 => DfuStatusCode::ErrErase,
            0x05 => DfuStatusCode::ErrCheckErased,
            0x06 => DfuStatusCode::ErrProg,
            0x07 => DfuStatusCode::ErrVerify,
            0x08 => DfuStatusCode::ErrAddress,
            0x09 => DfuStatusCode::ErrNotDone,
            0x0a => DfuStatusCode::ErrFirmware,
            0x0b => DfuStatusCode::ErrVendor,
            0x0c => DfuStatusCode::ErrUsbr,
            0x0d => DfuStatusCode::ErrPor,
            0x0e => DfuStatusCode::ErrUnknown,
            0x0f => DfuStatusCode::ErrStalledPkt,
            other => return Err(ProtocolError::InvalidDfuStatus(other)),
        };
        Ok(code)
    }
}

/// bState values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuDeviceState {
    AppIdle = 0,
    AppDetach = 1,
    DfuIdle = 2,
    DnloadSync = 3,
    DnBusy = 4,
    DnloadIdle = 5,
    ManifestSync = 6,
    Manifest = 7,
    ManifestWaitReset = 8,
    UploadIdle = 9,
    Error = 10,
}

impl TryFrom<u8> for DfuDeviceState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => DfuDeviceState::AppIdle,
            1 => DfuDeviceState::AppDetach,
            2 => DfuDeviceState::DfuIdle,
            3 => DfuDeviceState::DnloadSync,
            4 => DfuDeviceState::DnBusy,
            5 => DfuDeviceState::DnloadIdle,
            6 => DfuDeviceState::ManifestSync,
            7 => DfuDeviceState::Manifest,
            8 => DfuDeviceState::ManifestWaitReset,
            9 => DfuDeviceState::UploadIdle,
            10 => DfuDeviceState::Error,
            other => return Err(ProtocolError::InvalidDfuState(other)),
        })
    }
}

/// Decoded DFU_GETSTATUS response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuStatus {
    pub status: DfuStatusCode,
    /// bwPollTimeout, 24 bits
    pub poll_timeout_ms: u32,
    pub state: DfuDeviceState,
    pub string_index: u8,
}

impl DfuStatus {
    /// Status report with `bStatus = OK`
    pub fn ok(state: DfuDeviceState) -> Self {
        Self {
            status: DfuStatusCode::Ok,
            poll_timeout_ms: 0,
            state,
            string_index: 0,
        }
    }

    /// Decode the six status bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DFU_STATUS_LEN {
            return Err(ProtocolError::BufferTooSmall {
                needed: DFU_STATUS_LEN,
                available: bytes.len(),
            });
        }

        Ok(Self {
            status: DfuStatusCode::try_from(bytes[0])?,
            poll_timeout_ms: LittleEndian::read_u24(&bytes[1..4]),
            state: DfuDeviceState::try_from(bytes[4])?,
            string_index: bytes[5],
        })
    }

    /// Encode into the on-wire layout
    pub fn to_bytes(&self) -> [u8; DFU_STATUS_LEN] {
        let mut out = [0u8; DFU_STATUS_LEN];
        out[0] = self.status as u8;
        LittleEndian::write_u24(&mut out[1..4], self.poll_timeout_ms & 0x00ff_ffff);
        out[4] = self.state as u8;
        out[5] = self.string_index;
        out
    }

    /// The device reports no error and is not parked in dfuERROR.
    pub fn is_ok(&self) -> bool {
        self.status == DfuStatusCode::Ok && self.state != DfuDeviceState::Error
    }
}

/// DFU functional descriptor (bDescriptorType 0x21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuFunctionalDescriptor {
    /// bmAttributes
    pub attributes: u8,
    /// wDetachTimeOut in milliseconds
    pub detach_timeout_ms: u16,
    /// wTransferSize, the largest block the device accepts
    pub transfer_size: u16,
    /// bcdDFUVersion
    pub dfu_version: u16,
}

impl DfuFunctionalDescriptor {
    pub const CAN_DOWNLOAD: u8 = 1 << 0;
    pub const CAN_UPLOAD: u8 = 1 << 1;
    pub const MANIFESTATION_TOLERANT: u8 = 1 << 2;
    pub const WILL_DETACH: u8 = 1 << 3;

    pub fn can_upload(&self) -> bool {
        self.attributes & Self::CAN_UPLOAD != 0
    }
}
