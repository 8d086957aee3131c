//! Which earlier frames a frame transitively needs through the storage slots.

use crate::constants::NUM_STORAGE_SLOTS;

/// Returns the indices of all frames needed to decode the frame at `index`
/// and any frame after it, in no particular order.
///
/// `saved_as[i]` and `references[i]` are slot bit masks for frame `i`. Frames
/// after `index` are unknown and treated as reading every slot.
pub fn frame_dependencies(index: usize, saved_as: &[u8], references: &[u8]) -> Vec<usize> {
    debug_assert_eq!(saved_as.len(), references.len());
    debug_assert!(index < saved_as.len());
    let invalid = saved_as.len();

    // storage[s][i]: last frame stored in slot `s` at or before frame `i`.
    let storage: Vec<Vec<usize>> = (0..NUM_STORAGE_SLOTS)
        .map(|s| {
            let mut id = invalid;
            saved_as
                .iter()
                .enumerate()
                .map(|(i, &saved)| {
                    if saved & (1u8 << s) != 0 {
                        id = i;
                    }
                    id
                })
                .collect()
        })
        .collect();

    let mut result = Vec::new();
    let mut seen = vec![false; index + 1];
    let mut stack = vec![index];
    seen[index] = true;

    for slot in &storage {
        let frame_ref = slot[index];
        if frame_ref == invalid || seen[frame_ref] {
            continue;
        }
        seen[frame_ref] = true;
        stack.push(frame_ref);
        result.push(frame_ref);
    }

    while let Some(frame_index) = stack.pop() {
        if frame_index == 0 {
            continue;
        }
        for (s, slot) in storage.iter().enumerate() {
            if references[frame_index] & (1u8 << s) == 0 {
                continue;
            }
            let frame_ref = slot[frame_index - 1];
            if frame_ref == invalid || seen[frame_ref] {
                continue;
            }
            seen[frame_ref] = true;
            stack.push(frame_ref);
            result.push(frame_ref);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut v: Vec<usize>) -> Vec<usize> {
        v.sort_unstable();
        v
    }

    #[test]
    fn test_single_reference() {
        assert_eq!(frame_dependencies(1, &[8, 0], &[0, 8]), vec![0]);
    }

    #[test]
    fn test_chain_through_slots() {
        // 0 saves slot 0, 1 reads slot 0 and saves slot 1, 2 saves slot 0
        // again, 3 reads slot 1.
        let saved_as = [1, 2, 1, 0];
        let references = [0, 1, 0, 2];
        assert_eq!(
            sorted(frame_dependencies(3, &saved_as, &references)),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_overwritten_slot_is_not_needed() {
        // Frame 0 is replaced in slot 0 by frame 1 before frame 2.
        let saved_as = [1, 1, 0];
        let references = [0, 0, 1];
        assert_eq!(frame_dependencies(2, &saved_as, &references), vec![1]);
    }

    #[test]
    fn test_dc_slot_dependency() {
        let saved_as = [16, 1, 0];
        let references = [0, 16, 1];
        assert_eq!(
            sorted(frame_dependencies(2, &saved_as, &references)),
            vec![0, 1]
        );
    }

    #[test]
    fn test_idempotent() {
        let saved_as = [1, 2, 4, 0, 1];
        let references = [0, 1, 3, 7, 0xff];
        let first = sorted(frame_dependencies(3, &saved_as, &references));
        let second = sorted(frame_dependencies(3, &saved_as, &references));
        assert_eq!(first, second);
    }
}
