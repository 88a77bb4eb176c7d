// paths.rs - in-place prefixing of the resource paths block

use super::{ClusterResource, PathsInfo};

/// Size of the paths block once every resource path carries `prefix`.
pub fn prefixed_paths_size(paths_info: &PathsInfo, count_resources: u32, prefix: &str) -> u64 {
    paths_info.size + count_resources as u64 * prefix.len() as u64
}

/// Prepend `prefix` to every resource path, shifting the block in place and
/// updating `path_offset`/`path_size` on each resource. `paths_data` must be
/// the (possibly over-allocated) buffer holding the block from offset 0.
///
/// Fails without touching anything when the enlarged block does not fit.
pub fn prefix_resource_paths(
    paths_info: &PathsInfo,
    resources: &mut [ClusterResource],
    paths_data: &mut [u8],
    prefix: &str,
) -> bool {
    let count = resources.len() as u32;
    let required = prefixed_paths_size(paths_info, count, prefix);
    if required > paths_data.len() as u64 {
        return false;
    }

    let prefix_len = prefix.len();
    let extend = prefix_len * resources.len();

    // The block keeps trailing zeros; walk back to the terminator of the
    // last path.
    let mut end = (paths_info.size as usize).min(paths_data.len());
    while end > 0 && paths_data[end - 1] == 0 {
        end -= 1;
    }
    if end == 0 {
        // No paths stored at all; nothing to shift.
        return true;
    }

    // Rewrite back-to-front so source bytes are never clobbered before they
    // are moved.
    let mut terminator = end + extend;
    for resource in resources.iter_mut().rev() {
        paths_data[terminator] = 0;

        let path_len = resource.path_size as usize;
        let old_start = resource.path_offset as usize;
        let new_start = terminator - path_len - prefix_len;

        paths_data.copy_within(old_start..old_start + path_len, new_start + prefix_len);
        paths_data[new_start..new_start + prefix_len].copy_from_slice(prefix.as_bytes());

        resource.path_offset = new_start as u16;
        resource.path_size = (path_len + prefix_len) as u16;

        if new_start == 0 {
            break;
        }
        terminator = new_start - 1;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::super::read::ClusterView;
    use super::super::write::{write_cluster, ResourceData, WriteData, WriteParams};
    use super::*;

    fn two_path_cluster() -> Vec<u8> {
        let paths = ["a.txt", "b.txt"];
        let meta: &[&[u8]] = &[b"ma", b"mb"];
        let a = [1u8; 8];
        let b = [2u8; 8];
        let data = WriteData {
            paths: &paths,
            metadata: meta,
            data: &[ResourceData::new(&a), ResourceData::new(&b)],
            ..WriteData::default()
        };
        write_cluster(&mut WriteParams::default_chunking(1024), &data).unwrap()
    }

    fn path_at<'a>(paths_data: &'a [u8], resource: &ClusterResource) -> &'a str {
        let start = resource.path_offset as usize;
        let end = start + resource.path_size as usize;
        std::str::from_utf8(&paths_data[start..end]).unwrap()
    }

    #[test]
    fn test_empty_prefix_keeps_size() {
        let info = PathsInfo {
            offset: 0,
            size: 48,
        };
        assert_eq!(prefixed_paths_size(&info, 17, ""), 48);
    }

    #[test]
    fn test_prefix_rewrites_offsets() {
        let blob = two_path_cluster();
        let view = ClusterView::read_header(&blob).unwrap();
        let info = *view.paths_info();

        let mut resources: Vec<ClusterResource> = view.resources().collect();
        let original: Vec<String> = resources
            .iter()
            .map(|r| view.resource_path(r).unwrap().to_string())
            .collect();

        // Copy the block into a buffer with room for the growth.
        let grown = prefixed_paths_size(&info, resources.len() as u32, "pkg/");
        let mut paths_data = view.paths_data().to_vec();
        paths_data.resize(grown as usize, 0);

        assert!(prefix_resource_paths(&info, &mut resources, &mut paths_data, "pkg/"));

        for (resource, original) in resources.iter().zip(&original) {
            assert_eq!(resource.path_size as usize, original.len() + 4);
            assert_eq!(path_at(&paths_data, resource), format!("pkg/{original}"));
            // Terminators survive the shift.
            let end = resource.path_offset as usize + resource.path_size as usize;
            assert_eq!(paths_data[end], 0);
        }
        assert_eq!(resources[0].path_offset, 0);
    }

    #[test]
    fn test_prefix_fails_without_room() {
        let blob = two_path_cluster();
        let view = ClusterView::read_header(&blob).unwrap();
        let info = *view.paths_info();

        let mut resources: Vec<ClusterResource> = view.resources().collect();
        let before = resources.clone();
        let mut paths_data = view.paths_data().to_vec();
        let snapshot = paths_data.clone();

        // Exact-size buffer cannot absorb a non-empty prefix.
        assert!(!prefix_resource_paths(
            &info,
            &mut resources,
            &mut paths_data,
            "pkg/"
        ));
        assert_eq!(resources, before);
        assert_eq!(paths_data, snapshot);
    }

    #[test]
    fn test_empty_prefix_is_a_noop() {
        let blob = two_path_cluster();
        let view = ClusterView::read_header(&blob).unwrap();
        let info = *view.paths_info();

        let mut resources: Vec<ClusterResource> = view.resources().collect();
        let before = resources.clone();
        let mut paths_data = view.paths_data().to_vec();
        let snapshot = paths_data.clone();

        assert!(prefix_resource_paths(
            &info,
            &mut resources,
            &mut paths_data,
            ""
        ));
        assert_eq!(resources, before);
        assert_eq!(paths_data, snapshot);
    }
}
