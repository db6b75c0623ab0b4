use anyhow::Result;

fn main() -> Result<()> {
    bindbox::cli::run()
}
