use std::{thread, time::Duration};

use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, TransmitConfig},
        PinState, Pulse, PulseTicks, RmtChannel, TxRmtDriver, VariableLengthSignal,
    },
    units::FromValueType,
};
use log::{info, warn};

use astro_common::{IrDiagnostics, ShotKind, SircCode};

use crate::esp::monotonic_ms;

/// 80 MHz APB clock / 80 gives one RMT tick per microsecond.
const IR_TICK_DIVIDER: u8 = 80;
const IR_DUTY_PERCENT: u8 = 33;
/// Time the camera needs to act on a frame before the next command.
const SHOT_SETTLE_MS: u64 = 100;

enum IrBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

pub struct IrTransmitter {
    backend: IrBackend,
    code: SircCode,
    signal: Vec<Pulse>,
    frame_count: u8,
    carrier_khz: u32,
    last_send_ms: Option<u64>,
    sent_shots: u64,
    failed_shots: u64,
    last_error: Option<String>,
}

impl IrTransmitter {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        code: SircCode,
        repeats: u8,
        carrier_khz: u32,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(IR_DUTY_PERCENT)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;

        Ok(Self {
            backend: IrBackend::Rmt(tx),
            signal: sirc_pulses(&code)?,
            ..Self::disabled(code, repeats, carrier_khz)
        })
    }

    pub fn disabled(code: SircCode, repeats: u8, carrier_khz: u32) -> Self {
        Self {
            backend: IrBackend::Disabled,
            code,
            signal: Vec::new(),
            frame_count: repeats.saturating_add(1),
            carrier_khz,
            last_send_ms: None,
            sent_shots: 0,
            failed_shots: 0,
            last_error: None,
        }
    }

    /// Sends the shutter code once for `kind`, then waits for the camera.
    pub fn fire(&mut self, kind: ShotKind) -> anyhow::Result<()> {
        let result = self.send_frames();

        match &result {
            Ok(true) => {
                self.sent_shots = self.sent_shots.saturating_add(1);
                self.last_send_ms = Some(monotonic_ms());
                self.last_error = None;
                info!("{kind}: SIRC frame x{} sent", self.frame_count);
            }
            Ok(false) => warn!("IR disabled, dropping {kind}"),
            Err(err) => {
                self.failed_shots = self.failed_shots.saturating_add(1);
                self.last_error = Some(format!("{err:#}"));
                warn!("{kind} failed: {err:#}");
            }
        }

        thread::sleep(Duration::from_millis(SHOT_SETTLE_MS));
        result.map(|_| ())
    }

    pub fn diagnostics(&self) -> IrDiagnostics {
        IrDiagnostics {
            enabled: matches!(self.backend, IrBackend::Rmt(_)),
            protocol: format!("Sony SIRC {}-bit", self.code.bits()),
            carrier_khz: self.carrier_khz,
            frame_count: self.frame_count,
            repeat_gap_ms: self.code.repeat_gap_ms(),
            last_send_ms: self.last_send_ms,
            sent_shots: self.sent_shots,
            failed_shots: self.failed_shots,
            last_error: self.last_error.clone(),
        }
    }

    /// Returns `false` when there is no RMT backend to send on.
    fn send_frames(&mut self) -> anyhow::Result<bool> {
        let IrBackend::Rmt(tx) = &mut self.backend else {
            return Ok(false);
        };

        let pulse_refs: Vec<&Pulse> = self.signal.iter().collect();
        let mut signal = VariableLengthSignal::with_capacity(self.signal.len());
        signal
            .push(pulse_refs)
            .context("failed to convert SIRC timings to RMT signal")?;

        let gap = Duration::from_millis(self.code.repeat_gap_ms());
        for frame in 0..self.frame_count {
            tx.start_blocking(&signal)
                .context("failed to transmit SIRC frame over RMT")?;
            if frame + 1 < self.frame_count {
                thread::sleep(gap);
            }
        }

        Ok(true)
    }
}

fn sirc_pulses(code: &SircCode) -> anyhow::Result<Vec<Pulse>> {
    code.frame_timings()
        .into_iter()
        .enumerate()
        .map(|(index, duration)| {
            let level = if index % 2 == 0 {
                PinState::High
            } else {
                PinState::Low
            };
            let ticks = PulseTicks::new(duration).context("invalid SIRC pulse duration")?;
            Ok(Pulse::new(level, ticks))
        })
        .collect()
}
