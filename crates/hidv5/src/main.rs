//! hidv5-probe
//!
//! Drives the HID v5 resource against the real USB HID devices of this host
//! the way a guest would: reads the device list, describes each device and
//! polls its interrupt IN endpoint.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{GuestMemory, GuestRam, ReplyReceiver, create_reply_channel, setup_logging};
use hidv5::HidV5;
use hidv5::config::ShimConfig;
use hidv5::usb::{DeviceManager, HostDevice, RusbHostDevice};
use protocol::{
    DeviceHandle, IoVector, IoctlOpcode, IoctlRequest, IoctlvOpcode, IoctlvRequest, IpcResult,
    RequestId, layout,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

// Scratch regions in guest RAM
const VERSION_OUT: u32 = 0x0100;
const CHANGE_OUT: u32 = 0x0200;
const REQUEST_IN: u32 = 0x0400;
const INFO_OUT: u32 = 0x0500;
const INTR_PARAMS: u32 = 0x0600;
const INTR_DATA: u32 = 0x0700;
const INTR_DATA_SIZE: u32 = 0x40;

#[derive(Parser, Debug)]
#[command(name = "hidv5-probe")]
#[command(
    author,
    version,
    about = "USB HID v5 probe - exercise host HID devices through the guest interface"
)]
#[command(long_about = "
Runs the USBv5 HID resource against the HID devices attached to this host,
issuing the same requests a guest would and printing the replies.

EXAMPLES:
    # Describe every HID device
    hidv5-probe

    # List passthrough candidates and exit
    hidv5-probe --list-devices

    # Read 20 interrupt reports from each device
    hidv5-probe --poll 20

CONFIGURATION:
    The probe looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/rust-hidv5/hidv5.toml
    3. /etc/rust-hidv5/hidv5.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List HID devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Number of interrupt IN reports to read from each device
    #[arg(short, long, value_name = "COUNT", default_value_t = 0)]
    poll: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

/// Guest side of the probe: issues requests and waits for deferred replies
struct Probe {
    memory: Arc<GuestRam>,
    resource: HidV5,
    receiver: ReplyReceiver,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Probe {
    fn next_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn ioctl(
        &self,
        opcode: IoctlOpcode,
        buffer_in: u32,
        buffer_out: u32,
        buffer_out_size: u32,
    ) -> (RequestId, IpcResult) {
        let request = IoctlRequest {
            id: self.next_id(),
            opcode: opcode.value(),
            buffer_in,
            buffer_in_size: if buffer_in == 0 { 0 } else { 0x20 },
            buffer_out,
            buffer_out_size,
        };
        (request.id, self.resource.handle_ioctl(&request))
    }

    /// Wait for the deferred reply to `id`
    async fn wait_for(&self, id: RequestId) -> Result<i32> {
        loop {
            let completion = tokio::time::timeout(self.timeout, self.receiver.recv())
                .await
                .map_err(|_| anyhow!("No reply to {:?} within {:?}", id, self.timeout))??;
            if completion.request == id {
                return Ok(completion.return_value);
            }
            warn!("Unexpected completion {:?}", completion);
        }
    }

    fn version(&self) -> Result<u32> {
        let (_, result) = self.ioctl(IoctlOpcode::GetVersion, 0, VERSION_OUT, 4);
        if result != IpcResult::success() {
            return Err(anyhow!("GET_VERSION failed: {:?}", result));
        }
        Ok(self.memory.read_u32(VERSION_OUT)?)
    }

    async fn device_change(&self) -> Result<Vec<(DeviceHandle, u16, u16)>> {
        let (id, result) = self.ioctl(
            IoctlOpcode::GetDeviceChange,
            0,
            CHANGE_OUT,
            layout::DEVICE_CHANGE_SIZE,
        );
        if result != IpcResult::Deferred {
            return Err(anyhow!("GET_DEVICE_CHANGE refused: {:?}", result));
        }

        let count = self.wait_for(id).await?;
        let count = u32::try_from(count).map_err(|_| anyhow!("Device change failed: {}", count))?;
        let mut entries = Vec::new();
        for slot in 0..count {
            let entry = CHANGE_OUT + slot * layout::DEVICE_ENTRY_SIZE;
            entries.push((
                DeviceHandle(self.memory.read_u32(entry + layout::ENTRY_HANDLE)?),
                self.memory.read_u16(entry + layout::ENTRY_VENDOR_ID)?,
                self.memory.read_u16(entry + layout::ENTRY_PRODUCT_ID)?,
            ));
        }
        Ok(entries)
    }

    fn describe(&self, handle: DeviceHandle) -> Result<Vec<u8>> {
        self.memory.fill(REQUEST_IN, 0, 0x20)?;
        self.memory.write_u32(REQUEST_IN + layout::HANDLE, handle.0)?;
        let (_, result) = self.ioctl(
            IoctlOpcode::GetDeviceParams,
            REQUEST_IN,
            INFO_OUT,
            layout::DEVICE_INFO_SIZE,
        );
        if result != IpcResult::success() {
            return Err(anyhow!("GET_DEVICE_PARAMS for {:?} failed: {:?}", handle, result));
        }
        Ok(self
            .memory
            .read_vec(INFO_OUT, layout::DEVICE_INFO_SIZE as usize)?)
    }

    async fn poll(&self, handle: DeviceHandle, count: u32) -> Result<()> {
        for _ in 0..count {
            self.memory.fill(INTR_PARAMS, 0, 0x20)?;
            self.memory.write_u32(INTR_PARAMS + layout::HANDLE, handle.0)?;
            self.memory.write_u32(INTR_PARAMS + layout::INTR_DIRECTION, 0)?;
            self.memory
                .write_u16(INTR_PARAMS + layout::INTR_LENGTH, INTR_DATA_SIZE as u16)?;

            let request = IoctlvRequest {
                id: self.next_id(),
                opcode: IoctlvOpcode::InterruptMessage.value(),
                in_vectors: vec![IoVector::new(INTR_PARAMS, 0x20)],
                io_vectors: vec![IoVector::new(INTR_DATA, INTR_DATA_SIZE)],
            };
            let result = self.resource.handle_ioctlv(&request);
            if result != IpcResult::Deferred {
                return Err(anyhow!("Interrupt transfer refused: {:?}", result));
            }

            match self.wait_for(request.id).await {
                Ok(length) if length >= 0 => {
                    let report = self.memory.read_vec(INTR_DATA, length as usize)?;
                    println!("  {:?} report: {}", handle, hex(&report));
                }
                Ok(status) => println!("  {:?} transfer failed: {}", handle, status),
                Err(e) => {
                    self.cancel_in(handle)?;
                    // The cancelled transfer still answers
                    let status = self.wait_for(request.id).await?;
                    println!("  {:?} {} (status {})", handle, e, status);
                }
            }
        }
        Ok(())
    }

    fn cancel_in(&self, handle: DeviceHandle) -> Result<()> {
        self.memory.fill(REQUEST_IN, 0, 0x20)?;
        self.memory.write_u32(REQUEST_IN + layout::HANDLE, handle.0)?;
        self.memory.write_u32(REQUEST_IN + layout::CANCEL_SELECTOR, 1)?;
        self.ioctl(IoctlOpcode::CancelEndpoint, REQUEST_IN, 0, 0);
        Ok(())
    }

    /// Park a device-change hook and release it again with SHUTDOWN
    async fn shutdown(&self) -> Result<()> {
        let (id, result) = self.ioctl(
            IoctlOpcode::GetDeviceChange,
            0,
            CHANGE_OUT,
            layout::DEVICE_CHANGE_SIZE,
        );
        if result != IpcResult::Deferred {
            return Err(anyhow!("GET_DEVICE_CHANGE refused: {:?}", result));
        }
        self.ioctl(IoctlOpcode::Shutdown, 0, 0, 0);
        let status = self.wait_for(id).await?;
        info!("Device change hook released with {}", status);
        Ok(())
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ShimConfig::default();
        let path = ShimConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        hidv5::config::load_config(path).context("Failed to load configuration")?
    } else {
        ShimConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("rust-hidv5 probe v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let mut manager = DeviceManager::new(config.usb.filters.clone(), config.usb.transfer_timeout())
        .context("Failed to initialize USB")?;
    let changes = manager.scan().context("Failed to enumerate USB devices")?;

    let memory = Arc::new(GuestRam::new(config.guest.ram_size));
    let (replies, receiver) = create_reply_channel();
    let probe = Probe {
        memory: memory.clone(),
        resource: HidV5::new(memory, replies),
        receiver,
        next_id: AtomicU64::new(1),
        timeout: config.usb.transfer_timeout() * 2,
    };

    for device in &changes.arrived {
        probe.resource.attach_host_device(device.clone());
    }

    if args.list_devices {
        list_devices(&probe, &changes.arrived);
    } else {
        tokio::select! {
            result = run_probe(&probe, args.poll) => {
                if let Err(e) = result {
                    error!("Probe failed: {:#}", e);
                }
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted");
            }
        }
    }

    info!("Shutting down USB subsystem...");
    for device in &changes.arrived {
        probe.resource.detach_host_device(device.id());
    }
    for completion in probe.receiver.drain() {
        info!("Late completion {:?}", completion);
    }
    Ok(())
}

/// Print the virtual devices and exit
fn list_devices(probe: &Probe, hosts: &[Arc<RusbHostDevice>]) {
    let devices = probe.resource.registry().devices();
    if devices.is_empty() {
        println!("No HID devices found.");
        return;
    }

    println!("Found {} HID interface(s):\n", devices.len());
    for device in devices {
        let descriptor = device.host.device_descriptor();
        let host = hosts.iter().find(|h| h.id() == device.host.id());
        let (manufacturer, product) = host.map(|h| h.read_strings()).unwrap_or((None, None));
        println!(
            "  [{}] {:04x}:{:04x} - {} {}",
            device.handle.0,
            descriptor.vendor_id,
            descriptor.product_id,
            manufacturer.as_deref().unwrap_or("Unknown Manufacturer"),
            product.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Host {} Interface {} ({} alt settings)",
            device.host.id(),
            device.interface_number,
            device.alt_setting_count
        );
        println!();
    }
}

async fn run_probe(probe: &Probe, poll: u32) -> Result<()> {
    println!("USBv5 version: {:#x}", probe.version()?);

    let entries = probe.device_change().await?;
    println!("{} device(s) reported", entries.len());

    for (handle, vendor_id, product_id) in entries {
        println!("\n[{}] {:04x}:{:04x}", handle.0, vendor_id, product_id);
        match probe.describe(handle) {
            Ok(info) => {
                for (offset, chunk) in info.chunks(16).enumerate() {
                    println!("  {:02x}: {}", offset * 16, hex(chunk));
                }
            }
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        }
        probe.poll(handle, poll).await?;
    }

    probe.shutdown().await
}
