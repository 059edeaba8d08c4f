//! Batching diagnostics

/// Counters of one commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Batches created since the previous commit
    pub molecules_created: usize,
    /// Batches destroyed because they emptied
    pub molecules_destroyed: usize,
    /// Atoms moved into batch sublists
    pub atoms_added: usize,
    /// Atoms taken out of batch sublists
    pub atoms_removed: usize,
    /// Atoms dropped because their edit could not be applied
    pub dropped_atoms: usize,
    /// Atoms moved to another batch after an attribute change
    pub rebucketed_atoms: usize,
    /// Batches spliced next to a material-equivalent batch
    pub splices: usize,
    /// Batches whose attributes were reprocessed
    pub dirty_processed: usize,
    /// Batches demoted to vertex arrays after display-list exhaustion
    pub display_list_failures: usize,
    /// Sole-user batches that fell back to shared snapshots
    pub sole_user_fallbacks: usize,
    /// Batches that moved between the opaque and transparent passes
    pub transparency_transitions: usize,
    /// Scene edits drained from the edit queue
    pub edits_drained: usize,
}

impl CommitReport {
    /// Whether the commit changed nothing
    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

/// Cumulative batching statistics
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    /// Batches created
    pub molecules_created: u64,
    /// Batches destroyed
    pub molecules_destroyed: u64,
    /// Atoms added to batches
    pub atoms_added: u64,
    /// Atoms removed from batches
    pub atoms_removed: u64,
    /// Atoms dropped by failed edits
    pub dropped_atoms: u64,
    /// Atoms re-bucketed after attribute changes
    pub rebucketed_atoms: u64,
    /// Neighbor splices
    pub splices: u64,
    /// Display-list allocation failures
    pub display_list_failures: u64,
    /// Sole-user fallbacks
    pub sole_user_fallbacks: u64,
    /// Commits run
    pub commits: u64,
}

impl BatchStats {
    /// Fold one commit into the totals
    pub fn accumulate(&mut self, report: &CommitReport) {
        self.molecules_created += report.molecules_created as u64;
        self.molecules_destroyed += report.molecules_destroyed as u64;
        self.atoms_added += report.atoms_added as u64;
        self.atoms_removed += report.atoms_removed as u64;
        self.dropped_atoms += report.dropped_atoms as u64;
        self.rebucketed_atoms += report.rebucketed_atoms as u64;
        self.splices += report.splices as u64;
        self.display_list_failures += report.display_list_failures as u64;
        self.sole_user_fallbacks += report.sole_user_fallbacks as u64;
        self.commits += 1;
    }

    /// Batches currently alive according to the counters
    pub fn live_molecules(&self) -> u64 {
        self.molecules_created.saturating_sub(self.molecules_destroyed)
    }
}

/// Statistics of one render walk
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    /// Batches looked at
    pub batches_visited: usize,
    /// Batches that issued at least one draw
    pub batches_drawn: usize,
    /// Batches skipped by switch visibility
    pub batches_skipped: usize,
    /// Attribute loads issued
    pub attribute_loads: usize,
    /// Attribute loads that reloaded every kind
    pub full_reloads: usize,
    /// Display lists compiled
    pub display_list_compiles: usize,
    /// Display-list replays
    pub display_list_calls: usize,
    /// Vertex-array draws
    pub vertex_array_draws: usize,
    /// Native display lists deleted
    pub display_list_deletes: usize,
}

impl FrameStats {
    /// Total draw calls
    pub fn draw_calls(&self) -> usize {
        self.display_list_calls + self.vertex_array_draws
    }

    /// Average draw calls per drawn batch
    pub fn avg_draws_per_batch(&self) -> f32 {
        if self.batches_drawn == 0 {
            0.0
        } else {
            self.draw_calls() as f32 / self.batches_drawn as f32
        }
    }
}
