//! Patches: rectangles copied or added from a reference slot into the
//! frame being decoded.

use super::image::{ImageBundle, ReferenceSlots};
use crate::bit_io::{BitReader, BitWriter, U32Coder, U32Dist};
use crate::constants::{MAX_PATCHES, NUM_REFERENCE_SLOTS};
use crate::error::CodecError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

const NUM_PATCHES_DIST: U32Coder = [
    U32Dist::Val(0),
    U32Dist::Val(1),
    U32Dist::BitsOffset(4, 2),
    U32Dist::BitsOffset(16, 18),
];

const POSITION_DIST: U32Coder = [
    U32Dist::Bits(8),
    U32Dist::BitsOffset(11, 256),
    U32Dist::BitsOffset(14, 2304),
    U32Dist::BitsOffset(30, 18688),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum PatchMode {
    #[default]
    Replace = 0,
    Add = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    pub slot: u32,
    pub x0: u32,
    pub y0: u32,
    pub xsize: u32,
    pub ysize: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub mode: PatchMode,
}

impl Patch {
    fn read(reader: &mut BitReader) -> Result<Self, CodecError> {
        let patch = Self {
            slot: reader.read_bits(2)?,
            x0: reader.read_u32(&POSITION_DIST)?,
            y0: reader.read_u32(&POSITION_DIST)?,
            xsize: reader.read_u32(&POSITION_DIST)?,
            ysize: reader.read_u32(&POSITION_DIST)?,
            dst_x: reader.read_u32(&POSITION_DIST)?,
            dst_y: reader.read_u32(&POSITION_DIST)?,
            mode: PatchMode::try_from_primitive(reader.read_bits(1)?)
                .map_err(|_| CodecError::InvalidPatch)?,
        };
        if patch.xsize == 0 || patch.ysize == 0 {
            return Err(CodecError::InvalidPatch);
        }
        Ok(patch)
    }

    fn write(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        if self.slot >= NUM_REFERENCE_SLOTS || self.xsize == 0 || self.ysize == 0 {
            return Err(CodecError::InvalidEncoderInput);
        }
        writer.write_bits(self.slot, 2);
        for value in [
            self.x0, self.y0, self.xsize, self.ysize, self.dst_x, self.dst_y,
        ] {
            writer.write_u32(value, &POSITION_DIST)?;
        }
        writer.write_bits(self.mode.into(), 1);
        Ok(())
    }
}

pub fn read_patches(reader: &mut BitReader) -> Result<Vec<Patch>, CodecError> {
    let count = reader.read_u32(&NUM_PATCHES_DIST)?;
    if count > MAX_PATCHES {
        return Err(CodecError::InvalidPatch);
    }
    (0..count).map(|_| Patch::read(reader)).collect()
}

pub fn write_patches(writer: &mut BitWriter, patches: &[Patch]) -> Result<(), CodecError> {
    let count = u32::try_from(patches.len()).map_err(|_| CodecError::InvalidEncoderInput)?;
    if count > MAX_PATCHES {
        return Err(CodecError::InvalidEncoderInput);
    }
    writer.write_u32(count, &NUM_PATCHES_DIST)?;
    patches.iter().try_for_each(|p| p.write(writer))
}

/// Slot mask read by `patches`.
pub fn patch_references(patches: &[Patch]) -> u8 {
    patches.iter().fold(0u8, |mask, p| mask | (1u8 << p.slot))
}

fn fits(start: u32, size: u32, limit: usize) -> bool {
    (start as usize)
        .checked_add(size as usize)
        .is_some_and(|end| end <= limit)
}

pub fn apply_patches(
    layer: &mut ImageBundle,
    patches: &[Patch],
    slots: &ReferenceSlots,
) -> Result<(), CodecError> {
    for patch in patches {
        let source = slots
            .get(patch.slot as usize)
            .ok_or(CodecError::InvalidReference)?;
        if source.num_channels() != layer.num_channels() {
            return Err(CodecError::InvalidReference);
        }
        if !fits(patch.x0, patch.xsize, source.xsize)
            || !fits(patch.y0, patch.ysize, source.ysize)
            || !fits(patch.dst_x, patch.xsize, layer.xsize)
            || !fits(patch.dst_y, patch.ysize, layer.ysize)
        {
            return Err(CodecError::InvalidPatch);
        }
        for c in 0..layer.num_channels() {
            for dy in 0..patch.ysize as usize {
                for dx in 0..patch.xsize as usize {
                    let value = source.get(c, patch.x0 as usize + dx, patch.y0 as usize + dy);
                    let (x, y) = (patch.dst_x as usize + dx, patch.dst_y as usize + dy);
                    let out = match patch.mode {
                        PatchMode::Replace => value,
                        PatchMode::Add => layer.get(c, x, y) + value,
                    };
                    layer.set(c, x, y, out);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(slot: u32, mode: PatchMode) -> Patch {
        Patch {
            slot,
            x0: 1,
            y0: 0,
            xsize: 2,
            ysize: 2,
            dst_x: 0,
            dst_y: 1,
            mode,
        }
    }

    #[test]
    fn test_apply_replace_and_add() {
        let mut source = ImageBundle::new(3, 2, 1);
        source.channels[0] = vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5];
        let mut slots = ReferenceSlots::default();
        slots.store(1, source);

        let mut layer = ImageBundle::new(2, 3, 1);
        apply_patches(&mut layer, &[patch(1, PatchMode::Replace)], &slots).unwrap();
        assert_eq!(layer.channels[0], vec![0.0, 0.0, 0.1, 0.2, 0.4, 0.5]);

        apply_patches(&mut layer, &[patch(1, PatchMode::Add)], &slots).unwrap();
        assert_eq!(layer.channels[0], vec![0.0, 0.0, 0.2, 0.4, 0.8, 1.0]);
        assert_eq!(patch_references(&[patch(1, PatchMode::Add)]), 2);
    }

    #[test]
    fn test_invalid_patches() {
        let slots = ReferenceSlots::default();
        let mut layer = ImageBundle::new(2, 3, 1);
        assert_eq!(
            apply_patches(&mut layer, &[patch(0, PatchMode::Replace)], &slots),
            Err(CodecError::InvalidReference)
        );

        let mut slots = ReferenceSlots::default();
        slots.store(0, ImageBundle::new(2, 2, 1));
        assert_eq!(
            apply_patches(&mut layer, &[patch(0, PatchMode::Replace)], &slots),
            Err(CodecError::InvalidPatch)
        );
    }

    #[test]
    fn test_patch_list_coding() {
        let patches = vec![patch(3, PatchMode::Add), patch(0, PatchMode::Replace)];
        let mut writer = BitWriter::new();
        write_patches(&mut writer, &patches).unwrap();
        let bytes = writer.finish();
        assert_eq!(read_patches(&mut BitReader::new(&bytes)).unwrap(), patches);
    }
}
