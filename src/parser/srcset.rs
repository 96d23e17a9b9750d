/// Size descriptor attached to one `srcset` candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Descriptor {
    Width(u32),
    Density(f32),
    None,
}

/// Split a `srcset` attribute into `(url, descriptor)` pairs.
///
/// URLs may themselves contain commas, so a comma only ends a candidate
/// when it trails the URL or follows the descriptor.
pub fn parse_srcset(attr: &str) -> Vec<(String, Descriptor)> {
    let mut out = Vec::new();
    let mut rest = attr;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (raw_url, after) = rest.split_at(url_end);

        if raw_url.ends_with(',') {
            let url = raw_url.trim_end_matches(',');
            if !url.is_empty() {
                out.push((url.to_string(), Descriptor::None));
            }
            rest = after;
            continue;
        }

        let desc_end = after.find(',').unwrap_or(after.len());
        let (desc, after_desc) = after.split_at(desc_end);
        out.push((raw_url.to_string(), parse_descriptor(desc.trim())));
        rest = after_desc;
    }

    out
}

fn parse_descriptor(desc: &str) -> Descriptor {
    if let Some(w) = desc.strip_suffix('w').and_then(|n| n.parse::<u32>().ok()) {
        return Descriptor::Width(w);
    }
    if let Some(x) = desc.strip_suffix('x').and_then(|n| n.parse::<f32>().ok()) {
        return Descriptor::Density(x);
    }
    Descriptor::None
}

/// One resolution variant of a logical image.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub width: Option<u32>,
    pub bytes: Option<u64>,
    /// Position in document order; breaks ties.
    pub order: usize,
}

/// Pick the highest-resolution variant.
///
/// Widest explicit width wins when any candidate declares one; otherwise the
/// largest byte-size hint; otherwise the first listed. Ties go to the
/// earliest candidate in document order.
pub fn select_best(candidates: &[Candidate]) -> Option<&Candidate> {
    if candidates.iter().any(|c| c.width.is_some()) {
        return best_by(candidates, |c| c.width.map(u64::from));
    }
    if candidates.iter().any(|c| c.bytes.is_some()) {
        return best_by(candidates, |c| c.bytes);
    }
    candidates.iter().min_by_key(|c| c.order)
}

fn best_by(candidates: &[Candidate], key: impl Fn(&Candidate) -> Option<u64>) -> Option<&Candidate> {
    candidates
        .iter()
        .filter_map(|c| key(c).map(|k| (k, c)))
        .fold(None, |best: Option<(u64, &Candidate)>, (k, c)| match best {
            Some((bk, b)) if bk > k || (bk == k && b.order <= c.order) => Some((bk, b)),
            _ => Some((k, c)),
        })
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(url: &str, width: Option<u32>, bytes: Option<u64>, order: usize) -> Candidate {
        Candidate {
            url: url.into(),
            width,
            bytes,
            order,
        }
    }

    #[test]
    fn parses_width_and_density_descriptors() {
        let parsed = parse_srcset("a-400.jpg 400w, a-1200.jpg 1200w,b.jpg 2x , c.jpg");
        assert_eq!(
            parsed,
            vec![
                ("a-400.jpg".to_string(), Descriptor::Width(400)),
                ("a-1200.jpg".to_string(), Descriptor::Width(1200)),
                ("b.jpg".to_string(), Descriptor::Density(2.0)),
                ("c.jpg".to_string(), Descriptor::None),
            ]
        );
    }

    #[test]
    fn keeps_commas_inside_urls() {
        let parsed = parse_srcset("/img/w_400,q_80/a.jpg 400w, /img/w_1600,q_80/a.jpg 1600w");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].0, "/img/w_1600,q_80/a.jpg");
        assert_eq!(parsed[1].1, Descriptor::Width(1600));
    }

    #[test]
    fn empty_and_junk_srcset() {
        assert!(parse_srcset("").is_empty());
        assert!(parse_srcset(" , ,").is_empty());
        assert_eq!(parse_srcset("a.jpg big")[0].1, Descriptor::None);
    }

    #[test]
    fn widest_width_wins() {
        let c = vec![
            cand("thumb", None, Some(900_000), 0),
            cand("400", Some(400), None, 1),
            cand("1200", Some(1200), None, 2),
        ];
        assert_eq!(select_best(&c).unwrap().url, "1200");
    }

    #[test]
    fn falls_back_to_bytes_then_order() {
        let by_bytes = vec![
            cand("small", None, Some(10_000), 0),
            cand("big", None, Some(80_000), 1),
        ];
        assert_eq!(select_best(&by_bytes).unwrap().url, "big");

        let no_hints = vec![cand("second", None, None, 1), cand("first", None, None, 0)];
        assert_eq!(select_best(&no_hints).unwrap().url, "first");

        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn ties_go_to_earliest() {
        let c = vec![
            cand("later", Some(800), None, 3),
            cand("earlier", Some(800), None, 1),
        ];
        assert_eq!(select_best(&c).unwrap().url, "earlier");
    }
}
