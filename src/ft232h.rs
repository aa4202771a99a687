//! FT232H USB-to-I2C bridge via libMPSSE

use std::ptr;

use log::{debug, info};

use crate::error::{Result, SensorError, TransportError};
use crate::ffi::*;
use crate::transport::{RegisterTransport, RegisterValue, Timeout};

/// An open MPSSE I2C channel
///
/// libMPSSE transfers block until the bridge reports completion; the
/// `Timeout` argument is not enforced here. The channel is closed on drop.
pub struct Ft232hTransport {
    handle: FT_HANDLE,
}

impl Ft232hTransport {
    /// Open and configure an I2C channel at 400 kHz
    ///
    /// # Arguments
    /// * `channel_index` - Index of the I2C channel to use (usually 0)
    ///
    /// # Returns
    /// * `Ok(Ft232hTransport)` - Channel ready for transfers
    /// * `Err(SensorError::NoChannelsFound)` - No FT232H attached
    /// * `Err(SensorError::InvalidChannel)` - Index beyond the attached channels
    pub fn open(channel_index: u32) -> Result<Self> {
        let mut num_channels: DWORD = 0;
        let status = unsafe { I2C_GetNumChannels(&mut num_channels) };
        if status != FT_OK {
            return Err(TransportError::from(status).into());
        }

        if num_channels == 0 {
            return Err(SensorError::NoChannelsFound);
        }

        if channel_index >= num_channels {
            return Err(SensorError::InvalidChannel(channel_index));
        }

        let mut handle: FT_HANDLE = ptr::null_mut();
        let status = unsafe { I2C_OpenChannel(channel_index, &mut handle) };
        if status != FT_OK {
            return Err(TransportError::from(status).into());
        }

        let mut config = ChannelConfig::default();
        let status = unsafe { I2C_InitChannel(handle, &mut config) };
        if status != FT_OK {
            unsafe { I2C_CloseChannel(handle) };
            return Err(TransportError::from(status).into());
        }

        info!(
            "Opened I2C channel {} of {} at {} Hz",
            channel_index, num_channels, config.ClockRate
        );
        Ok(Self { handle })
    }

    /// Write `bytes` to `device`, checking every byte was acknowledged
    fn write_bytes(
        &mut self,
        device: u8,
        bytes: &[u8],
        options: DWORD,
    ) -> std::result::Result<(), TransportError> {
        let mut transferred: DWORD = 0;
        let status = unsafe {
            I2C_DeviceWrite(
                self.handle,
                device,
                bytes.len() as DWORD,
                bytes.as_ptr(),
                &mut transferred,
                options,
            )
        };

        if status != FT_OK {
            return Err(status.into());
        }

        // BREAK_ON_NACK stops the transfer at the first unacknowledged byte
        if (transferred as usize) < bytes.len() {
            debug!(
                "Write to 0x{:02X} stopped after {} of {} bytes",
                device,
                transferred,
                bytes.len()
            );
            return Err(TransportError::Nack { device });
        }

        Ok(())
    }
}

impl RegisterTransport for Ft232hTransport {
    fn write_register(
        &mut self,
        device: u8,
        register: u8,
        value: RegisterValue,
        _timeout: Timeout,
    ) -> std::result::Result<(), TransportError> {
        let options = I2C_TRANSFER_OPTIONS_START_BIT
            | I2C_TRANSFER_OPTIONS_STOP_BIT
            | I2C_TRANSFER_OPTIONS_BREAK_ON_NACK;
        self.write_bytes(device, &value.frame(register), options)
    }

    fn read_registers(
        &mut self,
        device: u8,
        register: u8,
        count: usize,
        _timeout: Timeout,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        // Register pointer without STOP so the read follows as a repeated START
        let options = I2C_TRANSFER_OPTIONS_START_BIT | I2C_TRANSFER_OPTIONS_BREAK_ON_NACK;
        self.write_bytes(device, &[register], options)?;

        let mut data = vec![0u8; count];
        let mut transferred: DWORD = 0;

        let options = I2C_TRANSFER_OPTIONS_START_BIT
            | I2C_TRANSFER_OPTIONS_STOP_BIT
            | I2C_TRANSFER_OPTIONS_NACK_LAST_BYTE
            | I2C_TRANSFER_OPTIONS_FAST_TRANSFER_BYTES;

        let status = unsafe {
            I2C_DeviceRead(
                self.handle,
                device,
                count as DWORD,
                data.as_mut_ptr(),
                &mut transferred,
                options,
            )
        };

        if status != FT_OK {
            return Err(status.into());
        }

        // With FAST_TRANSFER_BYTES the transferred count is not a byte count;
        // only the status is meaningful
        Ok(data)
    }
}

impl Drop for Ft232hTransport {
    fn drop(&mut self) {
        unsafe {
            I2C_CloseChannel(self.handle);
        }
    }
}
