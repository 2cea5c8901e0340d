// src/utils/progress.rs
use indicatif::{ProgressBar, ProgressStyle};

/// Creates a bar over the candidate set, or `None` when progress display is disabled.
pub fn candidate_progress_bar(enabled: bool, candidates: usize) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new(candidates as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message("Training candidates...");
    Some(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_respects_flag() {
        assert!(candidate_progress_bar(false, 3).is_none());
        let pb = candidate_progress_bar(true, 3).expect("bar when enabled");
        assert_eq!(pb.length(), Some(3));
    }
}
