// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CPU fallback for the compute stages.
//!
//! Buffers and images are shared between the renderer and the worker threads,
//! so their contents are stored as atomic words. Kernels only need relaxed
//! ordering: [`Dispatcher::barrier`] joins the workers before it returns.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use strata_encoding::{IntPoint, IntRect, IntSize};

use crate::{Error, Result};

/// A CPU implementation of a compute kernel.
///
/// It is called once per workgroup with the workgroup id and the bound
/// resources.
pub type CpuKernel = fn(workgroup: [u32; 3], bindings: &[CpuBinding]);

/// Byte-addressed memory made of atomic 32-bit words.
#[derive(Debug)]
pub struct CpuBuffer {
    words: Box<[AtomicU32]>,
}

impl CpuBuffer {
    /// Creates a zeroed buffer of at least `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            words: (0..size.div_ceil(4)).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.words.len() * 4
    }

    pub fn words(&self) -> &[AtomicU32] {
        &self.words
    }

    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    pub fn store(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    /// Copies `data` to the start of the buffer. A trailing partial word is
    /// zero extended.
    pub fn upload(&self, data: &[u8]) {
        for (word, chunk) in self.words.iter().zip(data.chunks(4)) {
            let mut bytes = [0; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            word.store(u32::from_le_bytes(bytes), Ordering::Relaxed);
        }
    }

    /// Copies the start of the buffer into `data`.
    pub fn download(&self, data: &mut [u8]) {
        for (word, chunk) in self.words.iter().zip(data.chunks_mut(4)) {
            let bytes = word.load(Ordering::Relaxed).to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

/// An RGBA8 image with one atomic word per pixel.
#[derive(Debug)]
pub struct CpuImage {
    size: IntSize,
    pixels: Box<[AtomicU32]>,
}

impl CpuImage {
    /// Creates a transparent image.
    pub fn new(size: IntSize) -> Self {
        let len = size.area().max(0) as usize;
        Self {
            size,
            pixels: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn size(&self) -> IntSize {
        self.size
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.size.width as usize * 4
    }

    fn index(&self, x: i32, y: i32) -> usize {
        assert!(
            x >= 0 && y >= 0 && x < self.size.width && y < self.size.height,
            "pixel ({x}, {y}) outside image of size {:?}",
            self.size
        );
        y as usize * self.size.width as usize + x as usize
    }

    pub fn load(&self, x: i32, y: i32) -> [u8; 4] {
        self.pixels[self.index(x, y)]
            .load(Ordering::Relaxed)
            .to_le_bytes()
    }

    pub fn store(&self, x: i32, y: i32, rgba: [u8; 4]) {
        self.pixels[self.index(x, y)].store(u32::from_le_bytes(rgba), Ordering::Relaxed);
    }

    /// Writes `size` pixels at `offset` from `data`, with rows `stride` bytes
    /// apart.
    pub fn write_rect(&self, offset: IntPoint, size: IntSize, data: &[u8], stride: usize) {
        for y in 0..size.height {
            let row = &data[y as usize * stride..][..size.width as usize * 4];
            for (x, px) in row.chunks_exact(4).enumerate() {
                self.store(
                    offset.x + x as i32,
                    offset.y + y,
                    [px[0], px[1], px[2], px[3]],
                );
            }
        }
    }

    /// Reads the pixels of `rect` into `data`, with rows `stride` bytes apart.
    pub fn read_rect(&self, rect: IntRect, data: &mut [u8], stride: usize) {
        for y in 0..rect.height() {
            let row = &mut data[y as usize * stride..][..rect.width() as usize * 4];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                px.copy_from_slice(&self.load(rect.min.x + x as i32, rect.min.y + y));
            }
        }
    }

    /// Copies `src_rect` of `src` to `dst_pos` in `self`.
    pub fn copy_from(&self, dst_pos: IntPoint, src: &Self, src_rect: IntRect) {
        for y in 0..src_rect.height() {
            for x in 0..src_rect.width() {
                let px = src.load(src_rect.min.x + x, src_rect.min.y + y);
                self.store(dst_pos.x + x, dst_pos.y + y, px);
            }
        }
    }

    /// The whole image as tightly packed RGBA8 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|px| px.load(Ordering::Relaxed).to_le_bytes())
            .collect()
    }
}

static_assertions::assert_impl_all!(CpuBuffer: Send, Sync);
static_assertions::assert_impl_all!(CpuImage: Send, Sync);

/// A resource bound to a kernel.
#[derive(Clone, Debug)]
pub enum CpuBinding {
    Buffer(Arc<CpuBuffer>),
    Image(Arc<CpuImage>),
}

impl CpuBinding {
    pub fn as_buffer(&self) -> &CpuBuffer {
        match self {
            Self::Buffer(b) => b,
            Self::Image(_) => panic!("resource type mismatch"),
        }
    }

    pub fn as_image(&self) -> &CpuImage {
        match self {
            Self::Image(img) => img,
            Self::Buffer(_) => panic!("resource type mismatch"),
        }
    }
}

/// A queued dispatch.
struct Job {
    kernel: CpuKernel,
    bindings: Arc<[CpuBinding]>,
    grid: [u32; 3],
}

impl Job {
    fn workgroups(&self) -> u32 {
        self.grid.iter().product()
    }

    /// Runs every `step`th workgroup, starting at `first`.
    fn run(&self, first: u32, step: u32) {
        let [x, y, _] = self.grid;
        let total = self.workgroups();
        let mut i = first;
        while i < total {
            let id = [i % x, (i / x) % y, i / (x * y)];
            (self.kernel)(id, &self.bindings);
            i += step;
        }
    }
}

/// Runs CPU kernels on a rayon thread pool.
///
/// Dispatches are queued until the next [`Dispatcher::barrier`], which runs
/// every queued workgroup and waits for them. Dispatches between two barriers
/// may run concurrently.
#[derive(Debug)]
pub struct Dispatcher {
    pool: ThreadPool,
    queue: Sender<Job>,
    pending: Receiver<Job>,
}

impl Dispatcher {
    /// Starts `num_workers` worker threads, or one per available core.
    pub fn new(num_workers: Option<NonZeroUsize>) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_workers.map_or(0, NonZeroUsize::get))
            .thread_name(|i| format!("strata cpu worker {i}"))
            .build()?;
        log::info!(
            "Starting CPU dispatcher with {} workers",
            pool.current_num_threads()
        );
        let (queue, pending) = crossbeam_channel::unbounded();
        Ok(Self {
            pool,
            queue,
            pending,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queues `kernel` for every workgroup in `grid`.
    pub fn dispatch(&self, kernel: CpuKernel, bindings: &Arc<[CpuBinding]>, grid: [u32; 3]) {
        let job = Job {
            kernel,
            bindings: bindings.clone(),
            grid,
        };
        if job.workgroups() == 0 {
            return;
        }
        // Both ends of the queue are owned by `self`.
        let _ = self.queue.send(job);
    }

    /// Runs every queued workgroup and blocks until they are done.
    ///
    /// Returns [`Error::KernelPanicked`] if a kernel panicked. The other
    /// dispatches of the batch still run, and the queue is empty afterwards.
    pub fn barrier(&self) -> Result<()> {
        let jobs: Vec<Job> = self.pending.try_iter().collect();
        if jobs.is_empty() {
            return Ok(());
        }
        let workers = self.num_workers() as u32;
        panic::catch_unwind(AssertUnwindSafe(|| {
            self.pool.scope(|s| {
                for job in &jobs {
                    let step = workers.min(job.workgroups());
                    for first in 0..step {
                        s.spawn(move |_| job.run(first, step));
                    }
                }
            });
        }))
        .map_err(|payload| Error::KernelPanicked(panic_message(&*payload)))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}

static_assertions::assert_impl_all!(Dispatcher: Send);

#[cfg(test)]
mod tests {
    use super::*;

    fn count(_: [u32; 3], bindings: &[CpuBinding]) {
        bindings[0].as_buffer().words()[0].fetch_add(1, Ordering::Relaxed);
    }

    fn record_id(id: [u32; 3], bindings: &[CpuBinding]) {
        let buf = bindings[0].as_buffer();
        let index = (id[2] * 6 + id[1] * 3 + id[0]) as usize;
        buf.store(index, buf.load(index) + 1);
    }

    fn boom(_: [u32; 3], _: &[CpuBinding]) {
        panic!("boom");
    }

    fn buffer_bindings(size: usize) -> (Arc<CpuBuffer>, Arc<[CpuBinding]>) {
        let buf = Arc::new(CpuBuffer::new(size));
        let bindings: Arc<[CpuBinding]> = Arc::new([CpuBinding::Buffer(buf.clone())]);
        (buf, bindings)
    }

    #[test]
    fn every_workgroup_runs_once() {
        let dispatcher = Dispatcher::new(NonZeroUsize::new(3)).unwrap();
        let (buf, bindings) = buffer_bindings(4 * 12);
        dispatcher.dispatch(record_id, &bindings, [3, 2, 2]);
        dispatcher.barrier().unwrap();
        assert!((0..12).all(|i| buf.load(i) == 1));
    }

    #[test]
    fn barrier_orders_dispatches() {
        let dispatcher = Dispatcher::new(NonZeroUsize::new(4)).unwrap();
        let (buf, bindings) = buffer_bindings(4);
        for _ in 0..10 {
            dispatcher.dispatch(count, &bindings, [7, 1, 1]);
            dispatcher.barrier().unwrap();
        }
        assert_eq!(buf.load(0), 70);
    }

    #[test]
    fn empty_grid_is_a_no_op() {
        let dispatcher = Dispatcher::new(NonZeroUsize::new(2)).unwrap();
        let (buf, bindings) = buffer_bindings(4);
        dispatcher.dispatch(count, &bindings, [0, 1, 1]);
        dispatcher.barrier().unwrap();
        assert_eq!(buf.load(0), 0);
    }

    #[test]
    fn dispatches_before_a_barrier_share_a_batch() {
        let dispatcher = Dispatcher::new(NonZeroUsize::new(2)).unwrap();
        let (buf, bindings) = buffer_bindings(4);
        dispatcher.dispatch(count, &bindings, [3, 1, 1]);
        dispatcher.dispatch(count, &bindings, [2, 2, 1]);
        assert_eq!(buf.load(0), 0);
        dispatcher.barrier().unwrap();
        assert_eq!(buf.load(0), 7);
    }

    #[test]
    fn kernel_panic_is_returned_from_barrier() {
        let dispatcher = Dispatcher::new(NonZeroUsize::new(2)).unwrap();
        let (buf, bindings) = buffer_bindings(4);
        dispatcher.dispatch(boom, &bindings, [1, 1, 1]);
        dispatcher.dispatch(count, &bindings, [4, 1, 1]);
        let err = dispatcher.barrier().unwrap_err();
        assert!(matches!(&err, Error::KernelPanicked(msg) if msg == "boom"), "{err}");
        // The rest of the batch ran.
        assert_eq!(buf.load(0), 4);

        // The pool survives, and the queue was drained.
        dispatcher.barrier().unwrap();
        dispatcher.dispatch(count, &bindings, [1, 1, 1]);
        dispatcher.barrier().unwrap();
        assert_eq!(buf.load(0), 5);
    }

    #[test]
    fn buffer_bytes() {
        let buf = CpuBuffer::new(6);
        assert_eq!(buf.size(), 8);
        buf.upload(&[1, 2, 3, 4, 5]);
        assert_eq!(buf.load(0), 0x0403_0201);
        assert_eq!(buf.load(1), 5);
        let mut out = [0; 6];
        buf.download(&mut out);
        assert_eq!(out, [1, 2, 3, 4, 5, 0]);
    }

    #[test]
    fn image_rects() {
        let src = CpuImage::new(IntSize::new(4, 4));
        let px = [[1, 2, 3, 4], [5, 6, 7, 8]].concat();
        src.write_rect(IntPoint::new(1, 1), IntSize::new(2, 1), &px, 8);
        let dst = CpuImage::new(IntSize::new(3, 3));
        dst.copy_from(IntPoint::new(0, 2), &src, IntRect::new(1, 1, 3, 2));
        assert_eq!(dst.load(0, 2), [1, 2, 3, 4]);
        assert_eq!(dst.load(1, 2), [5, 6, 7, 8]);
        let mut out = vec![0; 8];
        dst.read_rect(IntRect::new(0, 2, 2, 3), &mut out, 8);
        assert_eq!(out, px);
        assert_eq!(dst.to_bytes().len(), 36);
    }
}
