use std::path::Path;

use hostgate_core::GatewayError;

/// Entry names of `folder`, sorted. Non-UTF-8 names are decoded lossily.
pub async fn list_files(folder: &Path) -> Result<Vec<String>, GatewayError> {
    let context = folder.display().to_string();
    let meta = tokio::fs::metadata(folder)
        .await
        .map_err(|e| GatewayError::from_io(&context, &e))?;
    if !meta.is_dir() {
        return Err(GatewayError::validation(format!("not a directory: {context}")));
    }

    let mut entries = tokio::fs::read_dir(folder)
        .await
        .map_err(|e| GatewayError::from_io(&context, &e))?;
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| GatewayError::from_io(&context, &e))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
