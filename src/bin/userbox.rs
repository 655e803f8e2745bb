use anyhow::Result;

fn main() -> Result<()> {
    userbox::cli::run()
}
