use std::{env, fs};

use utoipa::OpenApi;
use vote_session::services::documentation::ApiDoc;

fn main() -> anyhow::Result<()> {
    let doc = ApiDoc::openapi().to_pretty_json()?;
    match env::args().nth(1) {
        Some(path) => fs::write(&path, doc)?,
        None => println!("{doc}"),
    }
    Ok(())
}
