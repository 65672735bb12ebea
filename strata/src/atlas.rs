// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Texture atlases and the allocations inside them.
//!
//! Images, materials and rendered layers all live in shared atlas textures.
//! Allocations that go unused for a few frames are evicted, and sparse
//! atlases are compacted by moving their allocations into fresh ones.

use std::ops::{Index, IndexMut};
use std::sync::Arc;

use smallvec::SmallVec;
use strata_encoding::{IntPoint, IntRect, IntSize};

use crate::cpu::CpuImage;
use crate::device::{BufferBinding, Device, DeviceError, TextureFilter, TextureFormat};
use crate::packer::Packer;

/// Frames an allocation may go unused before it is evicted.
pub const MAX_ALLOC_AGE: u64 = 3;
/// Frames an atlas may go unused before it is compacted, or freed if empty.
pub const MAX_ATLAS_AGE: u64 = 10;

/// Bindings of layer allocations: written by the compute stages and sampled
/// by the blit.
pub const LAYER_BINDINGS: BufferBinding =
    BufferBinding::SHADER_STORAGE_WRITE.union(BufferBinding::TEXTURE);
/// Bindings of material allocations: rendered to and read by the compute
/// stages.
pub const MATERIAL_BINDINGS: BufferBinding =
    BufferBinding::FRAMEBUFFER.union(BufferBinding::SHADER_STORAGE_READ);
/// Layers and materials share atlases.
pub const COMBINED_BINDINGS: BufferBinding = LAYER_BINDINGS.union(MATERIAL_BINDINGS);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct Key {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Storage with generational keys, so stale keys are detected instead of
/// aliasing a newer entry.
#[derive(Debug)]
struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    fn insert(&mut self, value: T) -> Key {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Key {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Key {
            index,
            generation: 0,
        }
    }

    fn get(&self, key: Key) -> Option<&T> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        Some(value)
    }
}

impl<T> Index<Key> for Arena<T> {
    type Output = T;

    fn index(&self, key: Key) -> &T {
        self.get(key).unwrap_or_else(|| panic!("use of dead entry {key:?}"))
    }
}

impl<T> IndexMut<Key> for Arena<T> {
    fn index_mut(&mut self, key: Key) -> &mut T {
        self.get_mut(key)
            .unwrap_or_else(|| panic!("use of dead entry {key:?}"))
    }
}

/// Identifies an atlas.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AtlasId(Key);

/// Identifies an allocation. Ids of evicted allocations stay dead forever.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AllocId(Key);

/// A rectangle inside an atlas.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub atlas: AtlasId,
    pub rect: IntRect,
    /// Whether the contents live in the atlas' CPU image.
    pub cpu: bool,
    /// The last frame the allocation was used.
    pub frame: u64,
}

/// A texture shared by many allocations.
#[derive(Debug)]
pub struct Atlas<T> {
    texture: Option<T>,
    cpu_image: Option<Arc<CpuImage>>,
    pub format: TextureFormat,
    pub bindings: BufferBinding,
    size: IntSize,
    allocs: Vec<AllocId>,
    packer: Packer,
    realized: bool,
    last_frame: u64,
    compact: bool,
}

impl<T> Atlas<T> {
    /// The backing texture, once realized.
    pub fn texture(&self) -> Option<&T> {
        self.texture.as_ref()
    }

    /// The CPU shadow image, if the atlas was realized for CPU use.
    pub fn cpu_image(&self) -> Option<&Arc<CpuImage>> {
        self.cpu_image.as_ref()
    }

    /// Size of the backing texture.
    pub fn size(&self) -> IntSize {
        self.size
    }

    /// Size needed to cover every allocation.
    pub fn packed_size(&self) -> IntSize {
        self.packer.sizes().first().copied().unwrap_or_default()
    }

    pub fn is_realized(&self) -> bool {
        self.realized
    }

    pub fn allocs(&self) -> &[AllocId] {
        &self.allocs
    }

    /// Marks the atlas for compaction at the end of the frame.
    pub fn set_compact(&mut self) {
        self.compact = true;
    }
}

/// Describes a new allocation.
#[derive(Copy, Clone, Debug)]
pub struct AllocQuery {
    /// Restrict the allocation to this atlas.
    pub atlas: Option<AtlasId>,
    pub size: IntSize,
    /// Only consider atlases without allocations.
    pub empty: bool,
    pub format: TextureFormat,
    /// Required bindings.
    pub bindings: BufferBinding,
    /// Skip atlases marked for compaction.
    pub nocompact: bool,
}

impl AllocQuery {
    pub fn new(size: IntSize, format: TextureFormat, bindings: BufferBinding) -> Self {
        Self {
            atlas: None,
            size,
            empty: false,
            format,
            bindings,
            nocompact: false,
        }
    }
}

/// The device work needed by [`Atlases`].
pub trait AtlasBackend {
    type Texture;

    fn create_texture(
        &mut self,
        format: TextureFormat,
        size: IntSize,
        bindings: BufferBinding,
    ) -> Result<Self::Texture, DeviceError>;

    fn copy_texture(
        &mut self,
        dst: &Self::Texture,
        dst_origin: IntPoint,
        src: &Self::Texture,
        src_rect: IntRect,
    );
}

impl<D: Device> AtlasBackend for D {
    type Texture = D::Texture;

    fn create_texture(
        &mut self,
        format: TextureFormat,
        size: IntSize,
        bindings: BufferBinding,
    ) -> Result<Self::Texture, DeviceError> {
        self.new_texture(
            format,
            size.width as u32,
            size.height as u32,
            TextureFilter::Nearest,
            TextureFilter::Nearest,
            bindings,
        )
    }

    fn copy_texture(
        &mut self,
        dst: &Self::Texture,
        dst_origin: IntPoint,
        src: &Self::Texture,
        src_rect: IntRect,
    ) {
        Device::copy_texture(self, dst, dst_origin, src, src_rect);
    }
}

#[derive(Copy, Clone, Debug)]
struct Move {
    src: AtlasId,
    dst_pos: IntPoint,
    src_rect: IntRect,
    cpu: bool,
}

/// Every atlas of a renderer.
#[derive(Debug)]
pub struct Atlases<T> {
    atlases: Arena<Atlas<T>>,
    /// Search order for reusing atlases.
    order: Vec<AtlasId>,
    allocs: Arena<Allocation>,
    max_dim: i32,
}

impl<T> Atlases<T> {
    /// Creates an empty set of atlases, each at most `max_dim` pixels wide
    /// and high.
    pub fn new(max_dim: u32) -> Self {
        Self {
            atlases: Arena::default(),
            order: Vec::new(),
            allocs: Arena::default(),
            max_dim: max_dim as i32,
        }
    }

    pub fn max_dim(&self) -> i32 {
        self.max_dim
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates over the atlases in search order.
    pub fn iter(&self) -> impl Iterator<Item = (AtlasId, &Atlas<T>)> + '_ {
        self.order.iter().map(|&id| (id, &self.atlases[id.0]))
    }

    pub fn atlas(&self, id: AtlasId) -> &Atlas<T> {
        &self.atlases[id.0]
    }

    pub fn atlas_mut(&mut self, id: AtlasId) -> &mut Atlas<T> {
        &mut self.atlases[id.0]
    }

    /// The allocation `id`.
    ///
    /// # Panics
    ///
    /// Panics if the allocation was evicted.
    pub fn allocation(&self, id: AllocId) -> &Allocation {
        &self.allocs[id.0]
    }

    pub fn is_live(&self, id: AllocId) -> bool {
        self.allocs.get(id.0).is_some()
    }

    /// Marks the allocation used in `frame`.
    ///
    /// # Panics
    ///
    /// Panics if the allocation was evicted.
    pub fn touch(&mut self, id: AllocId, frame: u64) {
        let Some(alloc) = self.allocs.get_mut(id.0) else {
            panic!("re-use of dead allocation");
        };
        alloc.frame = frame;
        self.atlases[alloc.atlas.0].last_frame = frame;
    }

    /// Allocates space for `query` and registers the allocation with its
    /// atlas.
    ///
    /// Returns `None` when `query.atlas` is set and full.
    ///
    /// # Panics
    ///
    /// Panics if `query.size` exceeds the maximum atlas size.
    pub fn alloc(&mut self, query: &AllocQuery, frame: u64, cpu: bool) -> Option<AllocId> {
        let (atlas, rect) = self.place(query, frame)?;
        let id = AllocId(self.allocs.insert(Allocation {
            atlas,
            rect,
            cpu,
            frame,
        }));
        self.atlases[atlas.0].allocs.push(id);
        Some(id)
    }

    /// Finds room for `query` without registering an allocation.
    fn place(&mut self, query: &AllocQuery, frame: u64) -> Option<(AtlasId, IntRect)> {
        let mut found = None;
        if let Some(id) = query.atlas {
            let atlas = &mut self.atlases[id.0];
            match atlas.packer.try_add(query.size) {
                Some(place) => found = Some((id, place.pos)),
                None => {
                    atlas.compact = true;
                    return None;
                }
            }
        } else {
            for &id in &self.order {
                let atlas = &mut self.atlases[id.0];
                if query.empty && !atlas.allocs.is_empty() {
                    continue;
                }
                if query.nocompact && atlas.compact {
                    continue;
                }
                if atlas.format != query.format || !atlas.bindings.contains(query.bindings) {
                    continue;
                }
                match atlas.packer.try_add(query.size) {
                    Some(place) => {
                        found = Some((id, place.pos));
                        break;
                    }
                    None => atlas.compact = true,
                }
            }
        }
        let (id, pos) = match found {
            Some(found) => found,
            None => {
                let mut packer = Packer::new(IntSize::new(self.max_dim, self.max_dim));
                packer.new_page();
                let Some(place) = packer.try_add(query.size) else {
                    panic!("atlas allocation too large ({:?})", query.size);
                };
                let id = AtlasId(self.atlases.insert(Atlas {
                    texture: None,
                    cpu_image: None,
                    format: query.format,
                    bindings: query.bindings,
                    size: IntSize::default(),
                    allocs: Vec::new(),
                    packer,
                    realized: false,
                    last_frame: frame,
                    compact: false,
                }));
                self.order.push(id);
                (id, place.pos)
            }
        };
        self.atlases[id.0].last_frame = frame;
        Some((id, IntRect::from_origin_size(pos, query.size)))
    }

    /// Ensures the atlas has a texture of at least `size` and freezes its
    /// packer to the texture size.
    ///
    /// # Panics
    ///
    /// Panics if a realized atlas would have to grow.
    pub fn realize<B: AtlasBackend<Texture = T>>(
        &mut self,
        id: AtlasId,
        use_cpu: bool,
        size: IntSize,
        backend: &mut B,
    ) -> Result<(), DeviceError> {
        let atlas = &mut self.atlases[id.0];
        if atlas.size.width < size.width || atlas.size.height < size.height {
            assert!(!atlas.realized, "resizing a realized atlas");
            atlas.texture = None;
            atlas.cpu_image = None;
            atlas.texture = Some(backend.create_texture(atlas.format, size, atlas.bindings)?);
            atlas.size = size;
        }
        atlas.packer.max_dims = atlas.size;
        atlas.realized = true;
        if use_cpu && atlas.cpu_image.is_none() {
            atlas.cpu_image = Some(Arc::new(CpuImage::new(atlas.size)));
        }
        Ok(())
    }

    /// Evicts stale allocations, moves the allocations of atlases marked for
    /// compaction into fresh atlases, and frees atlases that stayed empty.
    pub fn compact<B: AtlasBackend<Texture = T>>(
        &mut self,
        frame: u64,
        backend: &mut B,
    ) -> Result<(), DeviceError> {
        self.evict(frame);
        let order = self.order.clone();
        let mut next = 0;
        let mut moves: SmallVec<[Move; 16]> = SmallVec::new();
        while next < order.len() {
            let mut dst: Option<AtlasId> = None;
            let mut format = TextureFormat::Rgba8;
            let mut bindings = BufferBinding::NONE;
            let mut use_cpu = false;
            moves.clear();
            'fill: while next < order.len() {
                let src_id = order[next];
                let src = &self.atlases[src_id.0];
                if !src.compact {
                    next += 1;
                    continue;
                }
                if dst.is_some() && (format != src.format || !bindings.contains(src.bindings)) {
                    break;
                }
                format = src.format;
                bindings = src.bindings;
                while let Some(&alloc_id) = self.atlases[src_id.0].allocs.first() {
                    let src_rect = self.allocs[alloc_id.0].rect;
                    let query = AllocQuery {
                        atlas: dst,
                        nocompact: true,
                        ..AllocQuery::new(src_rect.size(), format, bindings)
                    };
                    let Some((dst_id, rect)) = self.place(&query, frame) else {
                        break 'fill;
                    };
                    dst = Some(dst_id);
                    let alloc = &mut self.allocs[alloc_id.0];
                    use_cpu |= alloc.cpu;
                    moves.push(Move {
                        src: src_id,
                        dst_pos: rect.min,
                        src_rect,
                        cpu: alloc.cpu,
                    });
                    alloc.atlas = dst_id;
                    alloc.rect = rect;
                    self.atlases[dst_id.0].allocs.push(alloc_id);
                    self.atlases[src_id.0].allocs.swap_remove(0);
                }
                let src = &mut self.atlases[src_id.0];
                src.compact = false;
                src.realized = false;
                src.packer.clear();
                src.packer.new_page();
                src.packer.max_dims = IntSize::new(self.max_dim, self.max_dim);
                next += 1;
            }
            let Some(dst_id) = dst else {
                break;
            };
            let size = self.atlases[dst_id.0].packed_size();
            self.realize(dst_id, use_cpu, size, backend)?;
            let dst = &self.atlases[dst_id.0];
            for m in &moves {
                let src = &self.atlases[m.src.0];
                if let (Some(dst_tex), Some(src_tex)) = (&dst.texture, &src.texture) {
                    backend.copy_texture(dst_tex, m.dst_pos, src_tex, m.src_rect);
                }
                if m.cpu {
                    if let (Some(dst_img), Some(src_img)) = (&dst.cpu_image, &src.cpu_image) {
                        dst_img.copy_from(m.dst_pos, src_img, m.src_rect);
                    }
                }
            }
            log::debug!("compacted {} allocations into {dst_id:?}", moves.len());
        }
        for i in (0..self.order.len()).rev() {
            let id = self.order[i];
            let atlas = &self.atlases[id.0];
            if atlas.allocs.is_empty() && frame.saturating_sub(atlas.last_frame) > MAX_ATLAS_AGE {
                self.atlases.remove(id.0);
                self.order.swap_remove(i);
            }
        }
        Ok(())
    }

    /// Evicts allocations unused for more than [`MAX_ALLOC_AGE`] frames and
    /// flags their atlases, along with stale non-empty atlases, for
    /// compaction.
    fn evict(&mut self, frame: u64) {
        for &id in &self.order {
            let atlas = &mut self.atlases[id.0];
            if !atlas.allocs.is_empty() && frame.saturating_sub(atlas.last_frame) > MAX_ATLAS_AGE
            {
                atlas.compact = true;
            }
            let allocs = &mut self.allocs;
            let before = atlas.allocs.len();
            atlas.allocs.retain(|&alloc_id| {
                let age = frame.saturating_sub(allocs[alloc_id.0].frame);
                if age > MAX_ALLOC_AGE {
                    allocs.remove(alloc_id.0);
                    false
                } else {
                    true
                }
            });
            if atlas.allocs.len() < before {
                atlas.compact = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct FakeTexture(u32);

    #[derive(Default)]
    struct FakeBackend {
        created: Vec<IntSize>,
        copies: Vec<(u32, IntPoint, u32, IntRect)>,
    }

    impl AtlasBackend for FakeBackend {
        type Texture = FakeTexture;

        fn create_texture(
            &mut self,
            _: TextureFormat,
            size: IntSize,
            _: BufferBinding,
        ) -> Result<FakeTexture, DeviceError> {
            self.created.push(size);
            Ok(FakeTexture(self.created.len() as u32))
        }

        fn copy_texture(
            &mut self,
            dst: &FakeTexture,
            dst_origin: IntPoint,
            src: &FakeTexture,
            src_rect: IntRect,
        ) {
            self.copies.push((dst.0, dst_origin, src.0, src_rect));
        }
    }

    fn query(w: i32, h: i32) -> AllocQuery {
        AllocQuery::new(IntSize::new(w, h), TextureFormat::Rgba8, BufferBinding::TEXTURE)
    }

    #[test]
    fn allocations_share_an_atlas() {
        let mut atlases = Atlases::<FakeTexture>::new(64);
        let a = atlases.alloc(&query(10, 10), 1, false).unwrap();
        let b = atlases.alloc(&query(10, 10), 1, false).unwrap();
        let (ra, rb) = (atlases.allocation(a), atlases.allocation(b));
        assert_eq!(ra.atlas, rb.atlas);
        assert!(!ra.rect.overlaps(&rb.rect));
        assert_eq!(atlases.len(), 1);
        assert_eq!(atlases.atlas(ra.atlas).allocs(), [a, b]);
    }

    #[test]
    fn empty_query_gets_fresh_atlas() {
        let mut atlases = Atlases::<FakeTexture>::new(64);
        let a = atlases.alloc(&query(10, 10), 1, false).unwrap();
        let q = AllocQuery {
            empty: true,
            ..query(10, 10)
        };
        let b = atlases.alloc(&q, 1, false).unwrap();
        assert_ne!(atlases.allocation(a).atlas, atlases.allocation(b).atlas);
    }

    #[test]
    fn mismatched_bindings_get_fresh_atlas() {
        let mut atlases = Atlases::<FakeTexture>::new(64);
        atlases.alloc(&query(4, 4), 1, false).unwrap();
        let q = AllocQuery::new(
            IntSize::new(4, 4),
            TextureFormat::Rgba8,
            BufferBinding::TEXTURE | BufferBinding::FRAMEBUFFER,
        );
        atlases.alloc(&q, 1, false).unwrap();
        assert_eq!(atlases.len(), 2);
    }

    #[test]
    #[should_panic(expected = "atlas allocation too large")]
    fn oversized_allocation_panics() {
        let mut atlases = Atlases::<FakeTexture>::new(16);
        atlases.alloc(&query(17, 1), 1, false);
    }

    #[test]
    fn full_fixed_atlas_is_marked_for_compaction() {
        let mut atlases = Atlases::<FakeTexture>::new(16);
        let a = atlases.alloc(&query(16, 16), 1, false).unwrap();
        let id = atlases.allocation(a).atlas;
        let q = AllocQuery {
            atlas: Some(id),
            ..query(1, 1)
        };
        assert_eq!(atlases.alloc(&q, 1, false), None);
        assert!(atlases.atlas(id).compact);
    }

    #[test]
    fn realize_freezes_size() {
        let mut atlases = Atlases::<FakeTexture>::new(64);
        let mut backend = FakeBackend::default();
        let a = atlases.alloc(&query(10, 10), 1, false).unwrap();
        let id = atlases.allocation(a).atlas;
        atlases.realize(id, true, IntSize::new(10, 10), &mut backend).unwrap();
        assert_eq!(backend.created, [IntSize::new(10, 10)]);
        let atlas = atlases.atlas(id);
        assert!(atlas.is_realized());
        assert_eq!(atlas.cpu_image().unwrap().size(), IntSize::new(10, 10));
        // Realizing again at the same size is a no-op.
        atlases.realize(id, true, IntSize::new(8, 8), &mut backend).unwrap();
        assert_eq!(backend.created.len(), 1);
        // The packer can no longer grow past the texture.
        let alloc = atlases.alloc(&query(10, 10), 1, false).unwrap();
        assert_ne!(atlases.allocation(alloc).atlas, id);
    }

    #[test]
    #[should_panic(expected = "resizing a realized atlas")]
    fn growing_realized_atlas_panics() {
        let mut atlases = Atlases::<FakeTexture>::new(64);
        let mut backend = FakeBackend::default();
        let a = atlases.alloc(&query(10, 10), 1, false).unwrap();
        let id = atlases.allocation(a).atlas;
        atlases.realize(id, false, IntSize::new(10, 10), &mut backend).unwrap();
        atlases.realize(id, false, IntSize::new(20, 10), &mut backend).unwrap();
    }

    #[test]
    fn touch_keeps_allocations_alive() {
        let mut atlases = Atlases::<FakeTexture>::new(64);
        let mut backend = FakeBackend::default();
        let kept = atlases.alloc(&query(4, 4), 1, false).unwrap();
        let dropped = atlases.alloc(&query(4, 4), 1, false).unwrap();
        for frame in 2..=5 {
            atlases.touch(kept, frame);
            atlases.compact(frame, &mut backend).unwrap();
        }
        assert!(atlases.is_live(kept));
        assert!(!atlases.is_live(dropped));
    }

    #[test]
    #[should_panic(expected = "re-use of dead allocation")]
    fn touching_dead_allocation_panics() {
        let mut atlases = Atlases::<FakeTexture>::new(64);
        let mut backend = FakeBackend::default();
        let a = atlases.alloc(&query(4, 4), 1, false).unwrap();
        atlases.compact(5, &mut backend).unwrap();
        atlases.touch(a, 6);
    }

    #[test]
    fn compaction_moves_live_allocations() {
        let mut atlases = Atlases::<FakeTexture>::new(64);
        let mut backend = FakeBackend::default();
        let a = atlases.alloc(&query(20, 20), 1, true).unwrap();
        let b = atlases.alloc(&query(8, 8), 1, true).unwrap();
        let src = atlases.allocation(b).atlas;
        let size = atlases.atlas(src).packed_size();
        atlases.realize(src, true, size, &mut backend).unwrap();
        let src_img = atlases.atlas(src).cpu_image().unwrap().clone();
        let old_rect = atlases.allocation(b).rect;
        src_img.store(old_rect.min.x, old_rect.min.y, [1, 2, 3, 4]);

        // `a` ages out; `b` stays in use and must move.
        atlases.touch(b, 5);
        atlases.compact(5, &mut backend).unwrap();
        assert!(!atlases.is_live(a));
        let moved = *atlases.allocation(b);
        assert_ne!(moved.atlas, src);
        assert_eq!(moved.rect.min, IntPoint::ZERO);
        assert_eq!(backend.copies, [(2, IntPoint::ZERO, 1, old_rect)]);
        let dst = atlases.atlas(moved.atlas);
        assert_eq!(dst.size(), IntSize::new(8, 8));
        assert_eq!(dst.cpu_image().unwrap().load(0, 0), [1, 2, 3, 4]);
        assert!(atlases.atlas(src).allocs().is_empty());
        assert!(!atlases.atlas(src).is_realized());
    }

    #[test]
    fn old_empty_atlases_are_freed() {
        let mut atlases = Atlases::<FakeTexture>::new(64);
        let mut backend = FakeBackend::default();
        atlases.alloc(&query(4, 4), 1, false).unwrap();
        atlases.compact(5, &mut backend).unwrap();
        assert_eq!(atlases.len(), 1);
        atlases.compact(11, &mut backend).unwrap();
        assert_eq!(atlases.len(), 1);
        atlases.compact(12, &mut backend).unwrap();
        assert!(atlases.is_empty());
    }
}
