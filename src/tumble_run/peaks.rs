//! Peak detection with a minimum spacing between accepted peaks.

use std::cmp::Ordering;

/// Indices of the local maxima of `signal`.
///
/// A peak is a sample strictly greater than its left neighbour and strictly
/// greater than the first differing sample to its right; a flat top resolves
/// to its middle index (rounded down). The first and last samples are never
/// peaks.
pub fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let n = signal.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let last = n - 1;
    let mut i = 1;
    while i < last {
        if signal[i - 1] < signal[i] {
            let mut ahead = i + 1;
            while ahead < last && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Finds peaks of `signal` that are at least `distance` samples apart.
///
/// Candidates are the [`local_maxima`] whose value is at least `height` (when
/// given). They are visited from highest to lowest, the later of two equal
/// peaks first, and each accepted peak suppresses the not-yet-visited
/// candidates closer than `distance`. The result is sorted by position. A `distance` of 0 or 1
/// suppresses nothing.
pub fn find_peaks(signal: &[f64], distance: usize, height: Option<f64>) -> Vec<usize> {
    let mut peaks = local_maxima(signal);
    if let Some(h) = height {
        peaks.retain(|&p| signal[p] >= h);
    }
    if distance <= 1 || peaks.len() < 2 {
        return peaks;
    }

    let mut priority: Vec<usize> = (0..peaks.len()).collect();
    priority.sort_by(|&a, &b| {
        signal[peaks[b]]
            .partial_cmp(&signal[peaks[a]])
            .unwrap_or(Ordering::Equal)
            .then(b.cmp(&a))
    });

    let mut keep = vec![true; peaks.len()];
    for &i in &priority {
        if !keep[i] {
            continue;
        }
        let mut j = i;
        while j > 0 && peaks[i] - peaks[j - 1] < distance {
            j -= 1;
            keep[j] = false;
        }
        let mut j = i + 1;
        while j < peaks.len() && peaks[j] - peaks[i] < distance {
            keep[j] = false;
            j += 1;
        }
    }

    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_maxima() {
        let signal = [0.0, 1.0, 0.0, 2.0, 2.0, 2.0, 1.0, 3.0, 3.0, 4.0];
        // plateau 3..=5 resolves to 4; the rising end is not a peak
        assert_eq!(local_maxima(&signal), vec![1, 4]);

        assert!(local_maxima(&[1.0, 2.0]).is_empty());
        assert!(local_maxima(&[1.0, 1.0, 1.0, 1.0]).is_empty());
        // a flat top running into the end is not a peak
        assert!(local_maxima(&[0.0, 1.0, 1.0]).is_empty());
    }

    #[test]
    fn test_distance_prefers_higher_peaks() {
        let mut signal = vec![0.0; 30];
        signal[5] = 1.0;
        signal[8] = 3.0;
        signal[12] = 2.0;
        signal[25] = 0.5;

        assert_eq!(find_peaks(&signal, 1, None), vec![5, 8, 12, 25]);
        assert_eq!(find_peaks(&signal, 4, None), vec![8, 12, 25]);
        assert_eq!(find_peaks(&signal, 5, None), vec![8, 25]);
        assert_eq!(find_peaks(&signal, 17, None), vec![8, 25]);
        assert_eq!(find_peaks(&signal, 18, None), vec![8]);
        assert_eq!(find_peaks(&signal, 30, None), vec![8]);
    }

    #[test]
    fn test_suppressed_peak_does_not_suppress() {
        // 10 suppresses 13, so 16 survives even though it is close to 13
        let mut signal = vec![0.0; 20];
        signal[10] = 3.0;
        signal[13] = 2.0;
        signal[16] = 1.0;
        assert_eq!(find_peaks(&signal, 4, None), vec![10, 16]);
    }

    #[test]
    fn test_height_filter() {
        let mut signal = vec![0.0; 20];
        signal[3] = 0.2;
        signal[10] = 1.5;
        signal[15] = 0.9;
        assert_eq!(find_peaks(&signal, 1, Some(0.9)), vec![10, 15]);
        assert!(find_peaks(&signal, 1, Some(2.0)).is_empty());
    }

    #[test]
    fn test_equal_heights_keep_the_later() {
        let mut signal = vec![0.0; 10];
        signal[3] = 1.0;
        signal[5] = 1.0;
        assert_eq!(find_peaks(&signal, 3, None), vec![5]);

        // a chain of equal peaks is resolved from the right
        let mut signal = vec![0.0; 12];
        for p in [2, 4, 6, 8] {
            signal[p] = 2.0;
        }
        assert_eq!(find_peaks(&signal, 3, None), vec![4, 8]);
    }
}
