//! Primary face selection.
//!
//! Only one face per frame is analysed: the largest one that is big enough
//! to classify reliably.

use crate::types::BoundingBox;

/// Default minimum face width and height in pixels.
pub const DEFAULT_MIN_FACE_SIZE: f32 = 30.0;

/// Pick the face with the strictly largest area among boxes whose width and
/// height are both at least `min_size`.
///
/// Ties keep the earlier box. A `min_size` of zero disables the filter.
pub fn select_primary_face(faces: &[BoundingBox], min_size: f32) -> Option<&BoundingBox> {
    let mut primary = None;
    let mut largest_area = 0.0f32;

    for face in faces {
        if face.width < min_size || face.height < min_size {
            continue;
        }
        let area = face.area();
        if area > largest_area {
            largest_area = area;
            primary = Some(face);
        }
    }

    primary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, w, h)
    }

    #[test]
    fn test_empty_has_no_primary() {
        assert!(select_primary_face(&[], DEFAULT_MIN_FACE_SIZE).is_none());
    }

    #[test]
    fn test_largest_area_wins() {
        let faces = vec![face(40.0, 40.0), face(100.0, 90.0), face(60.0, 60.0)];
        let primary = select_primary_face(&faces, DEFAULT_MIN_FACE_SIZE).unwrap();
        assert_eq!(primary.width, 100.0);
    }

    #[test]
    fn test_small_faces_filtered() {
        // The 200x20 box has the largest area but is too short.
        let faces = vec![face(200.0, 20.0), face(35.0, 35.0)];
        let primary = select_primary_face(&faces, DEFAULT_MIN_FACE_SIZE).unwrap();
        assert_eq!(primary.width, 35.0);
    }

    #[test]
    fn test_all_filtered_has_no_primary() {
        let faces = vec![face(29.0, 100.0), face(100.0, 29.0), face(10.0, 10.0)];
        assert!(select_primary_face(&faces, DEFAULT_MIN_FACE_SIZE).is_none());
    }

    #[test]
    fn test_exact_min_size_is_kept() {
        let faces = vec![face(30.0, 30.0)];
        assert!(select_primary_face(&faces, DEFAULT_MIN_FACE_SIZE).is_some());
    }

    #[test]
    fn test_tie_keeps_first() {
        let mut first = face(50.0, 50.0);
        first.x = 1.0;
        let mut second = face(25.0, 100.0);
        second.x = 2.0;
        let faces = vec![first, second];
        assert_eq!(select_primary_face(&faces, 0.0).unwrap().x, 1.0);
    }

    #[test]
    fn test_zero_min_size_disables_filter() {
        let faces = vec![face(5.0, 5.0)];
        assert!(select_primary_face(&faces, 0.0).is_some());
    }

    #[test]
    fn test_zero_area_is_never_primary() {
        let faces = vec![face(0.0, 0.0)];
        assert!(select_primary_face(&faces, 0.0).is_none());
    }
}
