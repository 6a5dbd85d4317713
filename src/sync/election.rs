use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub viewer_id: String,
    pub joined_at: u64,
}

impl Viewer {
    pub fn new(viewer_id: impl Into<String>, joined_at: u64) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            joined_at,
        }
    }

    pub fn seniority(&self, other: &Viewer) -> Ordering {
        self.joined_at
            .cmp(&other.joined_at)
            .then_with(|| self.viewer_id.cmp(&other.viewer_id))
    }

    pub fn outranks(&self, other: &Viewer) -> bool {
        self.seniority(other) == Ordering::Less
    }
}

pub fn elect_leader<'a, I>(viewers: I) -> Option<&'a Viewer>
where
    I: IntoIterator<Item = &'a Viewer>,
{
    viewers.into_iter().min_by(|a, b| a.seniority(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earliest_join_wins() {
        let viewers = vec![Viewer::new("b", 200), Viewer::new("a", 100)];
        assert_eq!(elect_leader(&viewers).map(|v| v.viewer_id.as_str()), Some("a"));
    }

    #[test]
    fn ties_break_on_viewer_id() {
        let viewers = vec![
            Viewer::new("zed", 50),
            Viewer::new("amy", 50),
            Viewer::new("bob", 50),
        ];
        assert_eq!(elect_leader(&viewers).map(|v| v.viewer_id.as_str()), Some("amy"));
    }

    #[test]
    fn election_ignores_ordering() {
        let mut viewers = vec![
            Viewer::new("c", 300),
            Viewer::new("a", 300),
            Viewer::new("d", 120),
            Viewer::new("b", 120),
        ];
        let first = elect_leader(&viewers).cloned();
        for _ in 0..viewers.len() {
            viewers.rotate_left(1);
            assert_eq!(elect_leader(&viewers).cloned(), first);
        }
        assert_eq!(first, Some(Viewer::new("b", 120)));
    }

    #[test]
    fn empty_presence_has_no_leader() {
        assert!(elect_leader(&Vec::<Viewer>::new()).is_none());
    }

    #[test]
    fn earlier_joiner_outranks() {
        assert!(Viewer::new("x", 50).outranks(&Viewer::new("a", 200)));
        assert!(!Viewer::new("a", 200).outranks(&Viewer::new("a", 200)));
    }
}
