use diffusion_bench_common::core::{Result, Tensor, D};

/// Byte-level prompt encoder: one learned row per byte value, averaged over the prompt.
pub(crate) struct PromptEmbedding {
    table: Tensor,
}

impl PromptEmbedding {
    pub(crate) const VOCAB_SIZE: usize = 256;

    pub(crate) fn new(table: Tensor) -> Self {
        Self { table }
    }

    /// Returns `(prompts.len() * repeats, c)`, with each prompt's row repeated `repeats` times in order.
    pub(crate) fn forward(&self, prompts: &[String], repeats: usize) -> Result<Tensor> {
        let mut rows = Vec::with_capacity(prompts.len() * repeats);
        for prompt in prompts {
            let ids = prompt.bytes().map(u32::from).collect::<Vec<_>>();
            let ids = Tensor::new(ids.as_slice(), self.table.device())?;
            let embed = self.table.index_select(&ids, 0)?.mean(D::Minus2)?;
            for _ in 0..repeats {
                rows.push(embed.clone());
            }
        }
        Tensor::stack(&rows, 0)
    }
}
