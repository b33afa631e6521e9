use anyhow::Result;

fn main() -> Result<()> {
    blobbench::cli::execute()
}
