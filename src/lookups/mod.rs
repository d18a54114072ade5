// ルックアップ層 - 各ツール固有のタスク読み込み・ルックアップ・集約

pub mod binder_scores;
pub mod command;
pub mod genotype;
pub mod job_tally;
pub mod pileup;

pub use binder_scores::{
    create_binder_indexes, create_reference_tables, find_score_files, BinderAggregate, BinderIds,
    BinderRow, BinderScoreLookup, BinderScoreLookupFactory, ScoreFile, BINDERS_TABLE,
};
pub use command::{CommandOutput, CommandRunner, TokioCommandRunner};
pub use genotype::{
    read_genotypes, AlleleIndex, Genotype, GenotypeAggregate, GenotypeLookup,
    GenotypeLookupFactory,
};
pub use job_tally::{
    read_job_list, JobPayload, JobStatus, JobTallyLookup, JobTallyLookupFactory, TallyAggregate,
    TallySummary,
};
pub use pileup::{
    read_mutation_sites, MutationSite, PileupLookup, PileupLookupFactory, ReadSupportAggregate,
};
