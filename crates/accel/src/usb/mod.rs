//! USB side of the accelerator lifecycle
//!
//! - [`host`]: contracts with the host stack, class drivers and board GPIO
//! - [`router`]: hands host events to the task owning the VID/PID
//! - [`attach`]: power sequencing and the vendor-class attach handshake
//! - [`dfu`]: firmware download with read-back verification
//!
//! Both tasks are actors: each runs on its own thread, owns its state
//! exclusively and is reached only through its queue.

pub mod attach;
pub mod dfu;
pub mod host;
pub mod power;
pub mod router;

#[cfg(test)]
pub(crate) mod mock;

pub use attach::{
    AttachClient, AttachIo, AttachSettings, AttachTask, DeviceObserver, spawn_attach_task,
};
pub use dfu::{DfuClient, DfuIo, DfuProgress, DfuSettings, DfuTask, spawn_dfu_task};
pub use host::{
    ClassHandle, DfuClassDriver, HostController, HostEvent, HostEventSink, HostEventStatus,
    PowerLines, TransferCallback, UsbError, VendorClassDriver,
};
pub use router::UsbEventRouter;
