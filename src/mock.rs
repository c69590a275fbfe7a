use std::path::Path;

use tempfile::TempDir;

use crate::backend::Backend;
use crate::paper::Paper;

/// A backend over a fresh temporary data directory. Keep the `TempDir` alive
/// for as long as the backend is used.
pub async fn create_backend() -> (TempDir, Backend) {
    let dir = tempfile::tempdir().unwrap();
    let backend = Backend::new(dir.path()).await.unwrap();

    (dir, backend)
}

#[cfg(not(feature = "backend-sql"))]
pub fn write_papers(data_dir: &Path, papers: &[Paper]) {
    use std::fmt::Write;

    let mut lines = String::new();
    for paper in papers {
        writeln!(lines, "{}", serde_json::to_string(paper).unwrap()).unwrap();
    }

    std::fs::write(data_dir.join("papers.txt"), lines).unwrap();
}

/// Stores papers the way the ingestion side would.
#[cfg(not(feature = "backend-sql"))]
pub async fn add_papers(data_dir: &Path, _backend: &Backend, papers: &[Paper]) {
    write_papers(data_dir, papers)
}

#[cfg(feature = "backend-sql")]
pub async fn add_papers(_data_dir: &Path, backend: &Backend, papers: &[Paper]) {
    for paper in papers {
        sqlx::query(
            "
            INSERT INTO papers
            (id, title, authors, abstract, journal, publish_date, field)
            VALUES
            (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&paper.id)
        .bind(&paper.title)
        .bind(serde_json::to_string(&paper.authors).unwrap())
        .bind(&paper.r#abstract)
        .bind(&paper.journal)
        .bind(paper.publish_date)
        .bind(paper.field.as_str())
        .execute(&backend.0)
        .await
        .unwrap();
    }
}
