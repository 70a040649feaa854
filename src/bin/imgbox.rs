use anyhow::Result;

fn main() -> Result<()> {
    imgbox::cli::run()
}
