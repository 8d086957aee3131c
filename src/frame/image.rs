use crate::constants::NUM_STORAGE_SLOTS;

/// Planar image with samples normalized to `[0, 1]`: the color channels
/// followed by the extra channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBundle {
    pub xsize: usize,
    pub ysize: usize,
    pub channels: Vec<Vec<f32>>,
}

impl ImageBundle {
    pub fn new(xsize: usize, ysize: usize, num_channels: usize) -> Self {
        Self {
            xsize,
            ysize,
            channels: vec![vec![0.0; xsize * ysize]; num_channels],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn same_size(&self, xsize: usize, ysize: usize) -> bool {
        self.xsize == xsize && self.ysize == ysize
    }

    #[inline]
    pub fn get(&self, c: usize, x: usize, y: usize) -> f32 {
        self.channels[c][y * self.xsize + x]
    }

    #[inline]
    pub fn set(&mut self, c: usize, x: usize, y: usize, value: f32) {
        self.channels[c][y * self.xsize + x] = value;
    }
}

/// Decoded frames kept for later frames: slots 0..=3 for `save_as_reference`,
/// 4..=7 for DC frames of level 1..=4.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSlots {
    slots: [Option<ImageBundle>; NUM_STORAGE_SLOTS],
}

impl ReferenceSlots {
    pub fn get(&self, slot: usize) -> Option<&ImageBundle> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn store(&mut self, slot: usize, image: ImageBundle) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(image);
        }
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots() {
        let mut slots = ReferenceSlots::default();
        assert!(slots.get(0).is_none());
        let mut image = ImageBundle::new(3, 2, 1);
        image.set(0, 2, 1, 0.5);
        slots.store(5, image);
        assert_eq!(slots.get(5).map(|i| i.get(0, 2, 1)), Some(0.5));
        assert!(slots.get(NUM_STORAGE_SLOTS).is_none());
        slots.clear();
        assert!(slots.get(5).is_none());
    }
}
