//! Read-only analysis queries over storage.
//!
//! Leaderboards, trends, percentiles and smoothing. Nothing here writes;
//! the aggregator owns all mutation and these functions run on the job
//! pool against reader connections.

use crate::error::Result;
use crate::keymap::is_letter_key;
use crate::storage::{DigraphStatRow, KeyStatRow, LocalStore, WordStatRow};

/// Minimum sample sizes before a row shows up on a leaderboard.
pub const MIN_KEY_PRESSES: u64 = 20;
pub const MIN_WORD_OBSERVATIONS: u64 = 3;
pub const MIN_DIGRAPH_SEQUENCES: u64 = 10;

pub struct Analyzer<'a> {
    store: &'a LocalStore,
}

impl<'a> Analyzer<'a> {
    pub fn new(store: &'a LocalStore) -> Self {
        Analyzer { store }
    }

    /// Letter keys with enough presses, slowest first.
    pub fn slowest_keys(&self, limit: usize, layout: &str) -> Result<Vec<KeyStatRow>> {
        let rows = self.store.key_stats_for_layout(layout, MIN_KEY_PRESSES)?;
        Ok(rows
            .into_iter()
            .filter(|r| is_letter_key(&r.key_name))
            .take(limit)
            .collect())
    }

    /// Letter keys with enough presses, fastest first.
    pub fn fastest_keys(&self, limit: usize, layout: &str) -> Result<Vec<KeyStatRow>> {
        let mut rows: Vec<KeyStatRow> = self
            .store
            .key_stats_for_layout(layout, MIN_KEY_PRESSES)?
            .into_iter()
            .filter(|r| is_letter_key(&r.key_name))
            .collect();
        rows.sort_by(|a, b| a.avg_press_time.total_cmp(&b.avg_press_time));
        rows.truncate(limit);
        Ok(rows)
    }

    pub fn slowest_words(&self, limit: usize, layout: &str) -> Result<Vec<WordStatRow>> {
        let rows = self
            .store
            .word_stats_for_layout(layout, MIN_WORD_OBSERVATIONS)?;
        Ok(rows.into_iter().take(limit).collect())
    }

    pub fn fastest_words(&self, limit: usize, layout: &str) -> Result<Vec<WordStatRow>> {
        let mut rows = self
            .store
            .word_stats_for_layout(layout, MIN_WORD_OBSERVATIONS)?;
        rows.sort_by(|a, b| a.avg_speed_ms_per_letter.total_cmp(&b.avg_speed_ms_per_letter));
        rows.truncate(limit);
        Ok(rows)
    }

    pub fn slowest_digraphs(&self, limit: usize, layout: &str) -> Result<Vec<DigraphStatRow>> {
        let rows = self
            .store
            .digraph_stats_for_layout(layout, MIN_DIGRAPH_SEQUENCES)?;
        Ok(rows.into_iter().take(limit).collect())
    }

    pub fn fastest_digraphs(&self, limit: usize, layout: &str) -> Result<Vec<DigraphStatRow>> {
        let mut rows = self
            .store
            .digraph_stats_for_layout(layout, MIN_DIGRAPH_SEQUENCES)?;
        rows.sort_by(|a, b| a.avg_interval_ms.total_cmp(&b.avg_interval_ms));
        rows.truncate(limit);
        Ok(rows)
    }

    /// The single slowest letter key, or `None` with too little data.
    pub fn slowest_letter(&self, layout: &str) -> Result<Option<KeyStatRow>> {
        Ok(self.slowest_keys(1, layout)?.into_iter().next())
    }

    /// Nearest-rank percentile over all stored burst WPM values.
    pub fn burst_wpm_percentile(&self, percentile: u8) -> Result<Option<f64>> {
        let mut wpms = self.store.burst_wpms()?;
        if wpms.is_empty() {
            return Ok(None);
        }
        wpms.sort_by(|a, b| a.total_cmp(b));
        Ok(Some(nearest_rank(&wpms, percentile)))
    }

    pub fn long_term_average_wpm(&self) -> Result<Option<f64>> {
        self.store.long_term_average_wpm()
    }

    pub fn today_best_wpm(&self) -> Result<Option<f64>> {
        self.store.best_wpm_for_date(&crate::util::today_string())
    }

    /// Burst-WPM histogram: `bin_count` equal-width bins spanning the
    /// observed range, returned as `(lower_edge, count)` pairs.
    pub fn wpm_histogram(&self, bin_count: usize) -> Result<Vec<(f64, u64)>> {
        let wpms = self.store.burst_wpms()?;
        if wpms.is_empty() || bin_count == 0 {
            return Ok(Vec::new());
        }
        let min = wpms.iter().copied().fold(f64::INFINITY, f64::min);
        let max = wpms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let width = ((max - min) / bin_count as f64).max(f64::EPSILON);

        let mut bins = vec![0u64; bin_count];
        for wpm in &wpms {
            let idx = (((wpm - min) / width) as usize).min(bin_count - 1);
            bins[idx] += 1;
        }
        Ok(bins
            .into_iter()
            .enumerate()
            .map(|(i, count)| (min + i as f64 * width, count))
            .collect())
    }

    /// Smoothed burst-WPM sequence: `(wpm_i, x_i)` with 1-indexed burst
    /// numbers, smoothed per [`apply_moving_average`].
    pub fn wpm_series(&self, smoothness: u32) -> Result<(Vec<f64>, Vec<usize>)> {
        let wpms = self.store.burst_wpms()?;
        Ok(apply_moving_average(&wpms, smoothness))
    }

    /// Avg/min/max/95th-percentile of stored burst durations.
    pub fn burst_duration_stats(&self) -> Result<Option<(f64, i64, i64, i64)>> {
        let durations = self.store.burst_durations()?;
        if durations.is_empty() {
            return Ok(None);
        }
        let min = *durations.first().unwrap_or(&0);
        let max = *durations.last().unwrap_or(&0);
        let sum: i64 = durations.iter().sum();
        let avg = sum as f64 / durations.len() as f64;
        let rank = nearest_rank_index(durations.len(), 95);
        Ok(Some((avg, min, max, durations[rank])))
    }
}

/// Nearest-rank percentile over an ascending-sorted slice.
fn nearest_rank(sorted: &[f64], percentile: u8) -> f64 {
    sorted[nearest_rank_index(sorted.len(), percentile)]
}

fn nearest_rank_index(len: usize, percentile: u8) -> usize {
    debug_assert!(len > 0);
    let rank = (f64::from(percentile) / 100.0 * len as f64).ceil() as usize;
    rank.clamp(1, len) - 1
}

/// Centered moving average over a WPM series.
///
/// The window adapts to the series length: smoothness 1 returns the raw
/// series, smoothness 100 uses a window of `max(5, 20%)` of the data,
/// always forced odd so the average stays centered. Output length equals
/// input length and x positions are 1-indexed burst numbers.
pub fn apply_moving_average(values: &[f64], smoothness: u32) -> (Vec<f64>, Vec<usize>) {
    let x_positions: Vec<usize> = (1..=values.len()).collect();
    if values.is_empty() || smoothness <= 1 {
        return (values.to_vec(), x_positions);
    }

    let n = values.len();
    let max_window = 5usize.max(n / 5);
    let mut window_size = 1 + ((smoothness - 1) as usize * (max_window - 1)) / 99;
    if window_size % 2 == 0 {
        window_size += 1;
    }

    let half = window_size / 2;
    let mut result = Vec::with_capacity(n);
    for i in 0..n {
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(n);
        let window = &values[start..end];
        result.push(window.iter().sum::<f64>() / window.len() as f64);
    }
    (result, x_positions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_raw_at_level_one() {
        let v = vec![10.0, 20.0, 30.0];
        let (smoothed, xs) = apply_moving_average(&v, 1);
        assert_eq!(smoothed, v);
        assert_eq!(xs, vec![1, 2, 3]);
    }

    #[test]
    fn smoothing_preserves_length_and_bounds() {
        let v: Vec<f64> = (0..50).map(|i| (i % 7) as f64 * 13.0).collect();
        for s in [2, 25, 50, 100] {
            let (smoothed, xs) = apply_moving_average(&v, s);
            assert_eq!(smoothed.len(), v.len());
            assert_eq!(xs.len(), v.len());
            let min = v.iter().copied().fold(f64::INFINITY, f64::min);
            let max = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            for value in smoothed {
                assert!(value >= min && value <= max);
            }
        }
    }

    #[test]
    fn smoothing_empty_input() {
        let (smoothed, xs) = apply_moving_average(&[], 50);
        assert!(smoothed.is_empty());
        assert!(xs.is_empty());
    }

    #[test]
    fn nearest_rank_examples() {
        let sorted = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(nearest_rank(&sorted, 50), 20.0);
        assert_eq!(nearest_rank(&sorted, 95), 40.0);
        assert_eq!(nearest_rank(&sorted, 100), 40.0);
        assert_eq!(nearest_rank(&[42.0], 95), 42.0);
    }
}
