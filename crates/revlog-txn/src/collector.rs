use std::collections::HashMap;

/// Edits grouped by target ref.
///
/// Refs iterate in the order they were first targeted, and edits for one ref
/// in the order they were added. That order is the order edits chain in.
pub struct UpdateCollector<E: ?Sized> {
    order: Vec<String>,
    edits: HashMap<String, Vec<Box<E>>>,
}

impl<E: ?Sized> Default for UpdateCollector<E> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            edits: HashMap::new(),
        }
    }
}

impl<E: ?Sized> UpdateCollector<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, ref_name: String, edit: Box<E>) {
        match self.edits.get_mut(&ref_name) {
            Some(list) => list.push(edit),
            None => {
                self.order.push(ref_name.clone());
                self.edits.insert(ref_name, vec![edit]);
            }
        }
    }

    pub fn contains(&self, ref_name: &str) -> bool {
        self.edits.contains_key(ref_name)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of distinct refs targeted.
    pub fn ref_count(&self) -> usize {
        self.order.len()
    }

    /// `(ref, edits)` in first-targeted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Box<E>])> {
        self.order.iter().map(move |name| {
            let edits = self.edits.get(name).map(Vec::as_slice).unwrap_or(&[]);
            (name.as_str(), edits)
        })
    }
}
