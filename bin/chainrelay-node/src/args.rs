use std::path::PathBuf;

use argh::FromArgs;

#[derive(Debug, Clone, FromArgs)]
#[argh(description = "chainrelay indexing node")]
pub struct Args {
    #[argh(option, short = 'c', description = "path to configuration file")]
    pub config: PathBuf,
}
