use std::cmp::Ordering;

use serde_json::Value;

use crate::types::{Movie, SortField};

/// Sort descending by `field`. Stable: ties keep their input order.
/// Movies without a value for `field` go last.
pub fn sort_movies(movies: &mut [Movie], field: SortField) {
    sort_descending(movies, |movie| movie.sort_value(field));
}

/// Same ordering for caller-supplied documents, which come back otherwise untouched.
/// Numeric text such as `"1998"` counts as a number.
pub fn sort_documents(documents: &mut [Value], field: SortField) {
    sort_descending(documents, |document| match document.get(field.as_str()) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    });
}

fn sort_descending<T>(items: &mut [T], key: impl Fn(&T) -> Option<f64>) {
    items.sort_by(|a, b| match (key(a), key(b)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn movie(title: &str, year: Option<f64>, vote: Option<f64>) -> Movie {
        Movie {
            original_title: Some(title.into()),
            year,
            vote_average: vote,
            ..Movie::default()
        }
    }

    fn titles(movies: &[Movie]) -> Vec<&str> {
        movies.iter().map(|m| m.title()).collect()
    }

    #[test]
    fn test_sort_by_year_descending_and_stable() {
        let mut movies = vec![
            movie("A", Some(1999.0), None),
            movie("B", Some(2014.0), None),
            movie("C", Some(1999.0), None),
            movie("D", Some(2021.0), None),
        ];
        sort_movies(&mut movies, SortField::Year);
        assert_eq!(titles(&movies), vec!["D", "B", "A", "C"]);
    }

    #[test]
    fn test_missing_values_sort_last() {
        let mut movies = vec![
            movie("none-1", None, None),
            movie("low", None, Some(5.5)),
            movie("none-2", None, None),
            movie("high", None, Some(8.1)),
        ];
        sort_movies(&mut movies, SortField::VoteAverage);
        assert_eq!(titles(&movies), vec!["high", "low", "none-1", "none-2"]);
    }

    #[test]
    fn test_documents_keep_unknown_fields() {
        let mut documents = vec![
            json!({"original_title": "Heat", "year": 1995, "poster": "heat.jpg"}),
            json!({"original_title": "Untitled"}),
            json!({"original_title": "Ronin", "year": "1998", "runtime": 122}),
        ];
        sort_documents(&mut documents, SortField::Year);
        assert_eq!(
            documents,
            vec![
                json!({"original_title": "Ronin", "year": "1998", "runtime": 122}),
                json!({"original_title": "Heat", "year": 1995, "poster": "heat.jpg"}),
                json!({"original_title": "Untitled"}),
            ]
        );
    }
}
