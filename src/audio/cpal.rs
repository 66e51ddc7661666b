//! cpal output backend (behind the `cpal-output` feature).
//!
//! The device stream lives on a dedicated thread (cpal streams are not
//! `Send`); the driver talks to it through a command channel and reads
//! the play cursor from a shared sample counter.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

use super::backend::{AudioBackend, AudioError, AudioStream};
use crate::core::Time;
use crate::decode::AudioDecoder;

pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn create_stream(
        &self,
        decoder: Arc<AudioDecoder>,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        CpalStream::open(decoder).map(|s| Box::new(s) as Box<dyn AudioStream>)
    }
}

enum Command {
    Pause,
    Resume,
    Stop,
}

pub struct CpalStream {
    commands: Sender<Command>,
    /// Total samples handed to the device across all channels.
    samples_played: Arc<AtomicU64>,
    sample_rate: u32,
    channels: u32,
    paused: bool,
    worker: Option<thread::JoinHandle<()>>,
}

impl CpalStream {
    fn open(decoder: Arc<AudioDecoder>) -> Result<Self, AudioError> {
        let sample_rate = decoder.sample_rate().max(1);
        let channels = decoder.channels().max(1);
        let samples_played = Arc::new(AtomicU64::new(0));
        let (command_tx, command_rx) = bounded::<Command>(4);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let counter = Arc::clone(&samples_played);
        let worker = thread::Builder::new()
            .name("strix-audio".into())
            .spawn(move || stream_thread(decoder, sample_rate, channels, counter, command_rx, ready_tx))
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                commands: command_tx,
                samples_played,
                sample_rate,
                channels,
                paused: false,
                worker: Some(worker),
            }),
            Ok(Err(err)) => {
                let _ = worker.join();
                Err(err)
            }
            Err(_) => {
                let _ = worker.join();
                Err(AudioError::Stream("audio thread exited".into()))
            }
        }
    }
}

fn stream_thread(
    decoder: Arc<AudioDecoder>,
    sample_rate: u32,
    channels: u32,
    samples_played: Arc<AtomicU64>,
    commands: Receiver<Command>,
    ready: Sender<Result<(), AudioError>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err(AudioError::DeviceUnavailable));
        return;
    };
    let config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
            let filled = decoder.copy_frame(data);
            data[filled..].fill(0);
            samples_played.fetch_add(data.len() as u64, Ordering::Release);
        },
        |err| error!(%err, "audio stream error"),
        None,
    );
    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(AudioError::Stream(err.to_string())));
            return;
        }
    };
    if let Err(err) = stream.play() {
        let _ = ready.send(Err(AudioError::Stream(err.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));
    debug!(sample_rate, channels, "audio stream started");

    while let Ok(command) = commands.recv() {
        let result = match command {
            Command::Pause => stream.pause(),
            Command::Resume => stream.play(),
            Command::Stop => break,
        };
        if let Err(err) = result {
            error!(%err, "audio stream command failed");
        }
    }
}

impl AudioStream for CpalStream {
    fn played_time(&self) -> Time {
        let samples = self.samples_played.load(Ordering::Acquire);
        samples * 1000 / (self.sample_rate as u64 * self.channels as u64)
    }

    fn is_timing_available(&self) -> bool {
        true
    }

    fn fill(&mut self) {
        // Callback-driven; the device pulls on its own schedule.
    }

    fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            let _ = self.commands.send(Command::Pause);
        }
    }

    fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            let _ = self.commands.send(Command::Resume);
        }
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
