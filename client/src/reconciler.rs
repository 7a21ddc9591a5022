use safehome_shared::{HISTORY_WINDOW_CAP, LocationSample, SampleError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Inserted,
    /// The same fix is already in the window; nothing changed.
    Duplicate,
    /// Older than everything in a full window, so it would be evicted at once.
    OutsideWindow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub kept: usize,
    pub rejected: usize,
    pub duplicates: usize,
}

/// Read-only snapshot of the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowView<'a> {
    /// Newest first.
    pub path: &'a [LocationSample],
    pub head: Option<&'a LocationSample>,
}

/// Bounded, newest-first history for one subject. Bulk fetches replace it,
/// pushes are folded in one at a time. After every mutation timestamps are
/// non-increasing and no fix appears twice.
#[derive(Debug, Clone)]
pub struct HistoryReconciler {
    samples: Vec<LocationSample>,
    cap: usize,
}

impl Default for HistoryReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryReconciler {
    pub fn new() -> Self {
        Self::with_cap(HISTORY_WINDOW_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            samples: Vec::with_capacity(cap.min(HISTORY_WINDOW_CAP)),
            cap: cap.max(1),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Replace the window with a bulk fetch result.
    pub fn load(&mut self, samples: Vec<LocationSample>) -> LoadSummary {
        let total = samples.len();
        let mut valid: Vec<LocationSample> = samples
            .into_iter()
            .filter(|sample| match sample.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, ts = %sample.ts, "dropping invalid history sample");
                    false
                }
            })
            .collect();
        let rejected = total - valid.len();

        // Stable, so server order survives among equal timestamps.
        valid.sort_by(|a, b| b.ts.cmp(&a.ts));
        let before_dedup = valid.len();
        let mut deduped: Vec<LocationSample> = Vec::with_capacity(before_dedup.min(self.cap));
        for sample in valid {
            let seen = deduped
                .iter()
                .rev()
                .take_while(|kept| kept.ts == sample.ts)
                .any(|kept| kept.same_fix(&sample));
            if !seen {
                deduped.push(sample);
            }
        }
        let duplicates = before_dedup - deduped.len();

        deduped.truncate(self.cap);
        self.samples = deduped;

        let summary = LoadSummary {
            kept: self.samples.len(),
            rejected,
            duplicates,
        };
        debug!(
            kept = summary.kept,
            rejected = summary.rejected,
            duplicates = summary.duplicates,
            "history window loaded"
        );
        summary
    }

    /// Fold one pushed sample into the window at its time-ordered position.
    pub fn push(&mut self, sample: LocationSample) -> Result<PushOutcome, SampleError> {
        sample.validate()?;

        let at = self.samples.partition_point(|kept| kept.ts > sample.ts);
        let duplicate = self.samples[at..]
            .iter()
            .take_while(|kept| kept.ts == sample.ts)
            .any(|kept| kept.same_fix(&sample));
        if duplicate {
            return Ok(PushOutcome::Duplicate);
        }
        if at >= self.cap {
            return Ok(PushOutcome::OutsideWindow);
        }

        self.samples.insert(at, sample);
        self.samples.truncate(self.cap);
        Ok(PushOutcome::Inserted)
    }

    pub fn current(&self) -> WindowView<'_> {
        WindowView {
            path: &self.samples,
            head: self.samples.first(),
        }
    }

    pub fn samples(&self) -> &[LocationSample] {
        &self.samples
    }

    pub fn head(&self) -> Option<&LocationSample> {
        self.samples.first()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
