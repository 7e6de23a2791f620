//! Partitions a unit's fields into size-bounded batches.

use tracing::debug;

use crate::core::{Batch, BatchId, Field, Unit, UnitId};
use crate::error::{GuardError, Result};

/// Cuts units into batches of at most `batch_size` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batcher {
    batch_size: usize,
    exclude_hidden: bool,
}

impl Batcher {
    /// Creates a batcher.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Configuration`] if `batch_size` is zero.
    pub fn new(batch_size: usize, exclude_hidden: bool) -> Result<Self> {
        if batch_size < 1 {
            return Err(GuardError::Configuration(format!(
                "batch size must be at least 1, got {batch_size}"
            )));
        }
        Ok(Self {
            batch_size,
            exclude_hidden,
        })
    }

    /// The target batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns true if `field` is submitted for validation at all.
    pub fn is_eligible(&self, field: &Field) -> bool {
        !(field.is_ignored() || (self.exclude_hidden && field.hidden))
    }

    /// Fields of `unit` that will be batched, in order.
    pub fn eligible_fields<'a>(&self, unit: &'a Unit) -> impl Iterator<Item = &'a Field> + 'a {
        let batcher = *self;
        unit.fields.iter().filter(move |f| batcher.is_eligible(f))
    }

    /// Returns a lazy sequence of batches over `unit`.
    ///
    /// The sequence can be cloned to restart it, and calling this method again
    /// yields the same batches with the same ids.
    pub fn batches<'a>(&self, unit: &'a Unit) -> Batches<'a> {
        Batches {
            batcher: *self,
            unit: &unit.id,
            fields: &unit.fields,
            position: 0,
            index: 0,
        }
    }

    /// Re-splits a batch that failed for a capacity reason.
    ///
    /// The effective size is halved (never below one) and the batch is cut
    /// into contiguous chunks of that size. Content failures must go to the
    /// isolator instead.
    pub fn resplit(&self, batch: &Batch) -> Vec<Batch> {
        let size = (batch.tier().min(batch.len()) / 2).max(1);
        let chunks: Vec<Batch> = batch
            .fields()
            .chunks(size)
            .enumerate()
            .filter_map(|(i, chunk)| {
                Batch::new(batch.id().chunk(i), batch.unit().clone(), chunk.to_vec(), size)
            })
            .collect();
        debug!(
            batch = %batch.id(),
            fields = batch.len(),
            new_size = size,
            chunks = chunks.len(),
            "Re-split batch after capacity failure"
        );
        chunks
    }
}

/// Lazy iterator over the batches of one unit.
#[derive(Debug, Clone)]
pub struct Batches<'a> {
    batcher: Batcher,
    unit: &'a UnitId,
    fields: &'a [Field],
    position: usize,
    index: usize,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let mut chunk = Vec::with_capacity(self.batcher.batch_size.min(self.fields.len()));
        while chunk.len() < self.batcher.batch_size && self.position < self.fields.len() {
            let field = &self.fields[self.position];
            self.position += 1;
            if self.batcher.is_eligible(field) {
                chunk.push(field.clone());
            }
        }
        let batch = Batch::new(
            BatchId::top_level(self.unit, self.index),
            self.unit.clone(),
            chunk,
            self.batcher.batch_size,
        )?;
        self.index += 1;
        Some(batch)
    }
}
