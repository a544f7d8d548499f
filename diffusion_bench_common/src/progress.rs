use indicatif::{ProgressBar, ProgressBarIter, ProgressIterator, ProgressStyle};

/// Wrap an iterator with a styled progress bar.
///
/// - The const parameter selects the bar color: `'b'` blue, `'g'` green, `'r'` red.
/// - When `silent` is set, the bar is hidden but the iterator is yielded unchanged.
///
/// ```rust
/// use diffusion_bench_common::NiceProgressBar;
///
/// let total: usize = NiceProgressBar::<_, 'g'>::new(0..4usize, "Counting", true)
///     .into_iter()
///     .sum();
/// assert_eq!(total, 6);
/// ```
pub struct NiceProgressBar<'a, T: ExactSizeIterator, const COLOR: char = 'b'> {
    iter: T,
    message: &'a str,
    silent: bool,
}

impl<'a, T: ExactSizeIterator, const COLOR: char> NiceProgressBar<'a, T, COLOR> {
    pub fn new(iter: T, message: &'a str, silent: bool) -> Self {
        Self {
            iter,
            message,
            silent,
        }
    }
}

impl<T: ExactSizeIterator, const COLOR: char> IntoIterator for NiceProgressBar<'_, T, COLOR> {
    type IntoIter = ProgressBarIter<T>;
    type Item = T::Item;

    fn into_iter(self) -> Self::IntoIter {
        let bar = if self.silent {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(self.iter.len() as u64)
        };
        let color = match COLOR {
            'g' => "green",
            'r' => "red",
            _ => "blue",
        };
        // The template is static apart from the color, so a parse failure falls back to the default bar.
        if let Ok(style) = ProgressStyle::with_template(&format!(
            "{{msg}} [{{elapsed_precise}}] [{{bar:40.{color}/{color}}}] {{pos}}/{{len}} ({{eta}})"
        )) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(self.message.to_string());
        self.iter.progress_with(bar)
    }
}

#[cfg(test)]
mod tests {
    use super::NiceProgressBar;

    #[test]
    fn yields_every_item_when_hidden() {
        let windows = [1.0f64, 0.5, 0.0];
        let seen = NiceProgressBar::<_, 'r'>::new(windows.windows(2), "Denoise loop", true)
            .into_iter()
            .count();
        assert_eq!(seen, 2);
    }
}
