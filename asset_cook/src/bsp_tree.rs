use cook_formats::bsp::{Bounds, BspLeaf, BspNode, Plane, TreeRef};

/// Distance below which a point counts as lying in a plane.
pub const PLANE_EPSILON: f32 = 1.0e-3;

#[derive(Clone, Debug)]
pub struct TreeFace {
    pub plane: u32,
    pub vertices: Vec<[f32; 3]>,
    pub bounds: Bounds,
    pub centroid: [f32; 3],
}

#[derive(Clone, Debug, Default)]
pub struct TreeBuild {
    pub nodes: Vec<BspNode>,
    pub leaves: Vec<BspLeaf>,
    pub leaf_faces: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Front,
    Back,
}

#[derive(Clone, Copy, Debug)]
struct Classified {
    side: Side,
    spanning: bool,
    coplanar: bool,
}

struct Split {
    plane: u32,
    front: Vec<u32>,
    back: Vec<u32>,
}

/// Recursively partitions `faces` (indexed in declaration order). Faces are
/// never split, so the leaves hold every face exactly once.
pub fn build_tree(
    faces: &[TreeFace],
    planes: &[Plane],
    max_depth: u32,
) -> Result<TreeBuild, String> {
    let mut build = TreeBuild::default();
    let all: Vec<u32> = (0..faces.len() as u32).collect();
    split_node(faces, planes, &all, 0, max_depth, &mut build)?;
    Ok(build)
}

fn split_node(
    faces: &[TreeFace],
    planes: &[Plane],
    set: &[u32],
    depth: u32,
    max_depth: u32,
    build: &mut TreeBuild,
) -> Result<TreeRef, String> {
    let Some(split) = choose_split(faces, planes, set) else {
        return Ok(emit_leaf(faces, set, build));
    };
    if depth >= max_depth {
        return Err(format!(
            "partition exceeds max depth {} ({} faces left to split)",
            max_depth,
            set.len()
        ));
    }
    let index = build.nodes.len();
    build.nodes.push(BspNode {
        plane: split.plane,
        front: TreeRef::Leaf(0),
        back: TreeRef::Leaf(0),
        bounds: set_bounds(faces, set),
    });
    let front = split_node(faces, planes, &split.front, depth + 1, max_depth, build)?;
    let back = split_node(faces, planes, &split.back, depth + 1, max_depth, build)?;
    build.nodes[index].front = front;
    build.nodes[index].back = back;
    Ok(TreeRef::Node(index as u32))
}

/// Lowest (spanning, |front - back|, declaration index) among valid
/// candidates.
fn choose_split(faces: &[TreeFace], planes: &[Plane], set: &[u32]) -> Option<Split> {
    let mut best: Option<((usize, usize, u32), Split)> = None;
    let mut tried: Vec<u32> = Vec::new();
    for &candidate in set {
        let plane_index = faces[candidate as usize].plane;
        // A repeated plane yields the same partition at a higher index.
        if tried.contains(&plane_index) {
            continue;
        }
        tried.push(plane_index);
        let plane = &planes[plane_index as usize];

        let mut front = Vec::new();
        let mut back = Vec::new();
        let mut spanning = 0usize;
        let mut front_solid = false;
        let mut back_solid = false;
        for &face_index in set {
            let face = &faces[face_index as usize];
            let classified = classify(face, plane, &planes[face.plane as usize]);
            if classified.spanning {
                spanning += 1;
            }
            match classified.side {
                Side::Front => {
                    front_solid |= !classified.coplanar;
                    front.push(face_index);
                }
                Side::Back => {
                    back_solid |= !classified.coplanar;
                    back.push(face_index);
                }
            }
        }
        if !front_solid || !back_solid {
            continue;
        }
        let score = (spanning, front.len().abs_diff(back.len()), candidate);
        if best.as_ref().map_or(true, |(current, _)| score < *current) {
            best = Some((
                score,
                Split {
                    plane: plane_index,
                    front,
                    back,
                },
            ));
        }
    }
    best.map(|(_, split)| split)
}

fn classify(face: &TreeFace, plane: &Plane, face_plane: &Plane) -> Classified {
    let mut any_front = false;
    let mut any_back = false;
    for vertex in &face.vertices {
        let distance = plane.distance(*vertex);
        if distance > PLANE_EPSILON {
            any_front = true;
        } else if distance < -PLANE_EPSILON {
            any_back = true;
        }
    }
    match (any_front, any_back) {
        (false, false) => {
            let facing = dot(face_plane.normal, plane.normal);
            Classified {
                side: if facing >= 0.0 { Side::Front } else { Side::Back },
                spanning: false,
                coplanar: true,
            }
        }
        (true, false) => Classified {
            side: Side::Front,
            spanning: false,
            coplanar: false,
        },
        (false, true) => Classified {
            side: Side::Back,
            spanning: false,
            coplanar: false,
        },
        (true, true) => Classified {
            side: if plane.distance(face.centroid) >= 0.0 {
                Side::Front
            } else {
                Side::Back
            },
            spanning: true,
            coplanar: false,
        },
    }
}

fn emit_leaf(faces: &[TreeFace], set: &[u32], build: &mut TreeBuild) -> TreeRef {
    let index = build.leaves.len() as u32;
    build.leaves.push(BspLeaf {
        first_leaf_face: build.leaf_faces.len() as u32,
        leaf_face_count: set.len() as u32,
        bounds: set_bounds(faces, set),
    });
    build.leaf_faces.extend_from_slice(set);
    TreeRef::Leaf(index)
}

fn set_bounds(faces: &[TreeFace], set: &[u32]) -> Bounds {
    let mut iter = set.iter().map(|index| faces[*index as usize].bounds);
    let Some(first) = iter.next() else {
        return Bounds::default();
    };
    iter.fold(first, |acc, bounds| acc.union(&bounds))
}

/// Deepest subtree whose node planes do not cut `bounds`.
pub fn locate_bounds(
    nodes: &[BspNode],
    planes: &[Plane],
    root: TreeRef,
    bounds: &Bounds,
) -> TreeRef {
    let mut current = root;
    while let TreeRef::Node(index) = current {
        let Some(node) = nodes.get(index as usize) else {
            break;
        };
        let Some(plane) = planes.get(node.plane as usize) else {
            break;
        };
        let corners = bounds.corners();
        let all_front = corners.iter().all(|corner| plane.distance(*corner) >= -PLANE_EPSILON);
        let all_back = corners.iter().all(|corner| plane.distance(*corner) <= PLANE_EPSILON);
        current = match (all_front, all_back) {
            (true, false) => node.front,
            (false, true) => node.back,
            _ => break,
        };
    }
    current
}

pub(crate) fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    /// Axis-aligned quads of a closed box, with outward planes.
    fn box_faces(min: [f32; 3], max: [f32; 3], planes: &mut Vec<Plane>, faces: &mut Vec<TreeFace>) {
        let specs: [([f32; 3], f32); 6] = [
            ([1.0, 0.0, 0.0], max[0]),
            ([-1.0, 0.0, 0.0], -min[0]),
            ([0.0, 1.0, 0.0], max[1]),
            ([0.0, -1.0, 0.0], -min[1]),
            ([0.0, 0.0, 1.0], max[2]),
            ([0.0, 0.0, -1.0], -min[2]),
        ];
        for (normal, dist) in specs {
            let axis = normal.iter().position(|value| *value != 0.0).unwrap_or(0);
            let value = if normal[axis] > 0.0 { max[axis] } else { min[axis] };
            let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
            let mut vertices = Vec::new();
            for (a, b) in [(min[u], min[v]), (max[u], min[v]), (max[u], max[v]), (min[u], max[v])] {
                let mut point = [0.0; 3];
                point[axis] = value;
                point[u] = a;
                point[v] = b;
                vertices.push(point);
            }
            let bounds = Bounds::from_points(vertices.iter()).expect("bounds");
            let centroid = [
                (bounds.min[0] + bounds.max[0]) * 0.5,
                (bounds.min[1] + bounds.max[1]) * 0.5,
                (bounds.min[2] + bounds.max[2]) * 0.5,
            ];
            planes.push(Plane { normal, dist });
            faces.push(TreeFace {
                plane: planes.len() as u32 - 1,
                vertices,
                bounds,
                centroid,
            });
        }
    }

    fn leaf_face_sets(build: &TreeBuild) -> Vec<u32> {
        let mut all = Vec::new();
        for leaf in &build.leaves {
            let start = leaf.first_leaf_face as usize;
            all.extend_from_slice(&build.leaf_faces[start..start + leaf.leaf_face_count as usize]);
        }
        all
    }

    #[test]
    fn single_box_is_one_convex_leaf() {
        let (mut planes, mut faces) = (Vec::new(), Vec::new());
        box_faces([0.0; 3], [1.0; 3], &mut planes, &mut faces);
        let build = build_tree(&faces, &planes, 64).expect("build");
        assert!(build.nodes.is_empty());
        assert_eq!(build.leaves.len(), 1);
        assert_eq!(build.leaf_faces, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn leaves_partition_faces_exactly() {
        let (mut planes, mut faces) = (Vec::new(), Vec::new());
        box_faces([0.0; 3], [1.0; 3], &mut planes, &mut faces);
        box_faces([3.0, 0.0, 0.0], [4.0, 1.0, 1.0], &mut planes, &mut faces);
        box_faces([0.0, 0.0, 3.0], [1.0, 2.0, 4.0], &mut planes, &mut faces);
        // A slab straddling the gap between the first two boxes.
        box_faces([0.5, 2.0, -1.0], [3.5, 2.5, 0.5], &mut planes, &mut faces);
        let build = build_tree(&faces, &planes, 64).expect("build");
        assert!(!build.nodes.is_empty());

        let all = leaf_face_sets(&build);
        let unique: BTreeSet<u32> = all.iter().copied().collect();
        assert_eq!(all.len(), faces.len());
        assert_eq!(unique, (0..faces.len() as u32).collect());
    }

    #[test]
    fn build_is_deterministic() {
        let (mut planes, mut faces) = (Vec::new(), Vec::new());
        box_faces([0.0; 3], [1.0; 3], &mut planes, &mut faces);
        box_faces([2.0, 0.0, 0.0], [3.0, 1.0, 1.0], &mut planes, &mut faces);
        let a = build_tree(&faces, &planes, 64).expect("a");
        let b = build_tree(&faces, &planes, 64).expect("b");
        assert_eq!(a.nodes, b.nodes);
        assert_eq!(a.leaves, b.leaves);
        assert_eq!(a.leaf_faces, b.leaf_faces);
    }

    #[test]
    fn depth_limit_is_enforced() {
        let (mut planes, mut faces) = (Vec::new(), Vec::new());
        box_faces([0.0; 3], [1.0; 3], &mut planes, &mut faces);
        box_faces([2.0, 0.0, 0.0], [3.0, 1.0, 1.0], &mut planes, &mut faces);
        let err = build_tree(&faces, &planes, 0).expect_err("depth");
        assert!(err.contains("max depth 0"));
    }

    #[test]
    fn bounds_locate_in_the_deepest_unsplit_subtree() {
        let (mut planes, mut faces) = (Vec::new(), Vec::new());
        box_faces([0.0; 3], [1.0; 3], &mut planes, &mut faces);
        box_faces([2.0, 0.0, 0.0], [3.0, 1.0, 1.0], &mut planes, &mut faces);
        let build = build_tree(&faces, &planes, 64).expect("build");
        let root = TreeRef::Node(0);
        let inside_second = Bounds {
            min: [2.2, 0.2, 0.2],
            max: [2.8, 0.8, 0.8],
        };
        assert!(matches!(
            locate_bounds(&build.nodes, &planes, root, &inside_second),
            TreeRef::Leaf(_)
        ));
        let straddling = Bounds {
            min: [-1.0, 0.0, 0.0],
            max: [4.0, 1.0, 1.0],
        };
        assert_eq!(locate_bounds(&build.nodes, &planes, root, &straddling), root);
    }
}
