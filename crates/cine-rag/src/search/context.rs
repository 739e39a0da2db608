use crate::types::Movie;

/// Render retrieved movies as prompt context, one `<document>` block each.
pub fn format_context(movies: &[Movie]) -> String {
    let mut out = String::new();
    for movie in movies {
        out.push_str("<document>\n");
        for (field, value) in movie.field_pairs() {
            out.push_str(field);
            out.push_str(": ");
            out.push_str(&value);
            out.push('\n');
        }
        out.push_str("</document>\n");
    }
    out
}

/// JSON documents for prompts that embed raw records (`{context}` slots).
pub fn documents_json(movies: &[Movie]) -> String {
    serde_json::to_string(movies).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MovieId;

    #[test]
    fn test_documents_in_column_order() {
        let movie = Movie {
            tmdb_id: Some(MovieId::Number(603)),
            original_title: Some("The Matrix".into()),
            genres: vec!["Action".into(), "Science Fiction".into()],
            year: Some(1999.0),
            popularity: Some(85.25),
            ..Movie::default()
        };
        let context = format_context(&[movie]);
        assert_eq!(
            context,
            "<document>\ntmdb_id: 603\noriginal_title: The Matrix\ngenres: Action,Science Fiction\nyear: 1999\npopularity: 85.25\n</document>\n"
        );
    }

    #[test]
    fn test_no_movies_means_empty_context() {
        assert_eq!(format_context(&[]), "");
        assert_eq!(documents_json(&[]), "[]");
    }
}
