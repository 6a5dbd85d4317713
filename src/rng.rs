use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn derive(seed: u32, salt: u64) -> Self {
        let mixed = (salt as u32) ^ ((salt >> 32) as u32).rotate_left(16);
        Self::new(seed ^ mixed.wrapping_mul(0x9e37_79b9))
    }

    pub fn next_f32(&mut self) -> f32 {
        self.state = self.state.wrapping_add(0x6d2b79f5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        let out = t ^ (t >> 14);
        (out as f64 / 4_294_967_296.0) as f32
    }

    pub fn range_i32(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        let span = (max - min + 1) as f32;
        (min + (self.next_f32() * span).floor() as i32).min(max)
    }

    pub fn chance(&mut self, probability: f32) -> bool {
        self.next_f32() < probability
    }

    pub fn pick_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        (self.next_f32() * len as f32).floor().min((len - 1) as f32) as usize
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.pick_index(items.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Rng::new(7);
        let mut b = Rng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_f32().to_bits(), b.next_f32().to_bits());
        }
    }

    #[test]
    fn range_stays_inclusive() {
        let mut rng = Rng::new(99);
        for _ in 0..500 {
            let value = rng.range_i32(3, 5);
            assert!((3..=5).contains(&value));
        }
        assert_eq!(rng.range_i32(4, 4), 4);
    }

    #[test]
    fn derived_streams_differ_by_salt() {
        let mut a = Rng::derive(11, 1);
        let mut b = Rng::derive(11, 2);
        let left: Vec<u32> = (0..4).map(|_| a.next_f32().to_bits()).collect();
        let right: Vec<u32> = (0..4).map(|_| b.next_f32().to_bits()).collect();
        assert_ne!(left, right);
    }

    #[test]
    fn pick_on_empty_is_none() {
        let mut rng = Rng::new(1);
        let empty: [u8; 0] = [];
        assert!(rng.pick(&empty).is_none());
        assert_eq!(rng.pick(&[9]), Some(&9));
    }
}
