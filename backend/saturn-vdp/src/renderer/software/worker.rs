//! Render worker threads fed through channels

use crate::renderer::{FrameParams, RendererCallbacks, RendererError, VdpWrite};
use crate::vdp1::Vdp1Snapshot;
use crate::vdp1::command::DrawCommand;
use crate::vdp1::registers::EraseParams;
use crate::vdp2::{Layer, Vdp2Snapshot};
use saturn_config::EnhancementConfig;
use std::mem;
use std::sync::mpsc::{self, Sender, SyncSender};
use std::thread::{self, JoinHandle};

// Writes are sent in batches to keep channel traffic down during bulk VRAM uploads
const WRITE_BATCH_LEN: usize = 256;

pub enum RenderEvent {
    Vdp1Reset(Box<Vdp1Snapshot>),
    Vdp2Reset(Box<Vdp2Snapshot>),
    Write(VdpWrite),
    Writes(Vec<VdpWrite>),
    Configure(EnhancementConfig),
    Callbacks(RendererCallbacks),
    SetLayerEnabled(Layer, bool),
    Vdp1Draw(Box<DrawCommand>),
    Vdp1Erase { framebuffer: usize, params: EraseParams },
    Vdp1Swap { display_framebuffer: usize },
    Vdp1EndFrame,
    Vdp2BeginFrame(FrameParams),
    Vdp2DrawLine(u32),
    Vdp2EndFrame,
    Sync(SyncSender<()>),
    Shutdown,
}

pub trait EventHandler: Send + 'static {
    fn handle(&mut self, event: RenderEvent);
}

/// A render thread that applies events in submission order.
#[derive(Debug)]
pub struct Worker {
    name: &'static str,
    sender: Sender<RenderEvent>,
    pending_writes: Vec<VdpWrite>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn(
        name: &'static str,
        mut handler: impl EventHandler,
    ) -> Result<Self, RendererError> {
        let (sender, receiver) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    match event {
                        RenderEvent::Shutdown => break,
                        RenderEvent::Sync(ack) => {
                            // The requester may have given up waiting
                            let _ = ack.send(());
                        }
                        event => handler.handle(event),
                    }
                }

                log::debug!("{name} thread terminating");
            })
            .map_err(|source| RendererError::ThreadSpawn { name, source })?;

        log::debug!("Spawned {name} thread");

        Ok(Self {
            name,
            sender,
            pending_writes: Vec::with_capacity(WRITE_BATCH_LEN),
            handle: Some(handle),
        })
    }

    pub fn write(&mut self, write: VdpWrite) {
        self.pending_writes.push(write);
        if self.pending_writes.len() >= WRITE_BATCH_LEN {
            self.flush_writes();
        }
    }

    /// Queue an event behind every write submitted so far.
    pub fn send(&mut self, event: RenderEvent) {
        self.flush_writes();
        self.send_raw(event);
    }

    /// Block until the thread has processed everything queued so far.
    pub fn sync(&mut self) {
        let (ack_sender, ack_receiver) = mpsc::sync_channel(1);
        self.send(RenderEvent::Sync(ack_sender));
        if ack_receiver.recv().is_err() {
            log::error!("{} thread exited before acknowledging sync", self.name);
        }
    }

    fn flush_writes(&mut self) {
        if self.pending_writes.is_empty() {
            return;
        }

        let writes = mem::replace(&mut self.pending_writes, Vec::with_capacity(WRITE_BATCH_LEN));
        self.send_raw(RenderEvent::Writes(writes));
    }

    fn send_raw(&self, event: RenderEvent) {
        if self.sender.send(event).is_err() {
            log::error!("{} thread is no longer receiving events", self.name);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.send_raw(RenderEvent::Shutdown);

        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("{} thread panicked", self.name);
        }
    }
}

/// A handler that either runs on the caller's thread or on its own worker thread.
pub enum Unit<H> {
    Inline(Box<H>),
    Threaded(Worker),
}

impl<H: EventHandler> Unit<H> {
    /// # Errors
    ///
    /// Returns an error if `threaded` is set and the thread cannot be spawned.
    pub fn new(name: &'static str, handler: H, threaded: bool) -> Result<Self, RendererError> {
        if threaded {
            Worker::spawn(name, handler).map(Self::Threaded)
        } else {
            Ok(Self::Inline(Box::new(handler)))
        }
    }

    pub fn write(&mut self, write: VdpWrite) {
        match self {
            Self::Inline(handler) => handler.handle(RenderEvent::Write(write)),
            Self::Threaded(worker) => worker.write(write),
        }
    }

    pub fn send(&mut self, event: RenderEvent) {
        match self {
            Self::Inline(handler) => handler.handle(event),
            Self::Threaded(worker) => worker.send(event),
        }
    }

    pub fn sync(&mut self) {
        if let Self::Threaded(worker) = self {
            worker.sync();
        }
    }

    #[must_use]
    pub fn is_threaded(&self) -> bool {
        matches!(self, Self::Threaded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::WriteTarget;
    use std::sync::{Arc, Mutex};
    use test_log::test;

    struct Recorder(Arc<Mutex<Vec<u32>>>);

    impl EventHandler for Recorder {
        fn handle(&mut self, event: RenderEvent) {
            let mut log = self.0.lock().unwrap();
            match event {
                RenderEvent::Write(write) => log.push(write.address),
                RenderEvent::Writes(writes) => log.extend(writes.iter().map(|write| write.address)),
                RenderEvent::Vdp2DrawLine(y) => log.push(1000 + y),
                _ => {}
            }
        }
    }

    #[test]
    fn writes_are_flushed_before_other_events() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut worker = Worker::spawn("test worker", Recorder(Arc::clone(&log))).unwrap();

        worker.write(VdpWrite::word(WriteTarget::Vdp2Vram, 2, 0));
        worker.write(VdpWrite::word(WriteTarget::Vdp2Vram, 4, 0));
        worker.send(RenderEvent::Vdp2DrawLine(5));
        worker.write(VdpWrite::word(WriteTarget::Vdp2Vram, 6, 0));
        worker.sync();

        assert_eq!(*log.lock().unwrap(), vec![2, 4, 1005, 6]);
    }

    #[test]
    fn inline_unit_handles_events_immediately() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut unit = Unit::new("inline", Recorder(Arc::clone(&log)), false).unwrap();
        assert!(!unit.is_threaded());

        unit.write(VdpWrite::word(WriteTarget::Vdp2Vram, 8, 0));
        assert_eq!(*log.lock().unwrap(), vec![8]);
    }
}
