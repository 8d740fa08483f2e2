use std::fs::File;
use std::path::Path;

use plane_stream::enums::Channel;
use plane_stream::volume::compose_plane;
use plane_stream::{
    ChannelWindow, CpuTextures, DecodeError, PlaneCache, RefreshOutcome, StripSource,
    TiffStripDecoder, ViewMode,
};
use tempfile::tempdir;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{TiffEncoder, colortype};

const WIDTH: u32 = 7;
const HEIGHT: u32 = 5;
const ROWS_PER_STRIP: u32 = 2;

fn sample(image: usize, x: u32, y: u32) -> u16 {
    (image as u16) * 1000 + (y as u16) * 10 + x as u16
}

/// Write `count` Gray16 directories of `WIDTH`x`HEIGHT` in strips of
/// `ROWS_PER_STRIP` rows.
fn write_container(path: &Path, count: usize) {
    let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
    for i in 0..count {
        let data: Vec<u16> = (0..HEIGHT)
            .flat_map(|y| (0..WIDTH).map(move |x| sample(i, x, y)))
            .collect();
        let mut image = encoder
            .new_image::<colortype::Gray16>(WIDTH, HEIGHT)
            .unwrap();
        image.rows_per_strip(ROWS_PER_STRIP).unwrap();
        image.write_data(&data).unwrap();
    }
}

fn full_decode(path: &Path, index: usize) -> Vec<u16> {
    let mut decoder = Decoder::new(File::open(path).unwrap()).unwrap();
    decoder.seek_to_image(index).unwrap();
    match decoder.read_image().unwrap() {
        DecodingResult::U16(data) => data,
        other => panic!("unexpected sample type: {other:?}"),
    }
}

#[test]
fn strips_reassemble_to_full_decode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stack.tif");
    write_container(&path, 3);

    let mut decoder = TiffStripDecoder::open(&path).unwrap();
    assert_eq!(decoder.image_count(), 3);

    let layout = decoder.select_image(1).unwrap();
    assert_eq!(layout.strip_count, 3);
    assert_eq!(layout.strip_rows(2), 1);

    let mut buf = vec![0u16; layout.max_strip_len()];
    let mut plane = Vec::new();
    for strip in 0..layout.strip_count {
        let n = decoder.read_strip(strip, &mut buf).unwrap();
        assert_eq!(n, (WIDTH * layout.strip_rows(strip)) as usize);
        plane.extend_from_slice(&buf[..n]);
    }

    assert_eq!(plane, full_decode(&path, 1));
}

#[test]
fn failed_selection_does_not_poison_decoder() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stack.tif");
    write_container(&path, 2);

    let mut decoder = TiffStripDecoder::open(&path).unwrap();
    let err = decoder.select_image(5).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::DirectoryOutOfRange { index: 5, count: 2 }
    ));

    // No directory is selected after a failed seek.
    let mut buf = vec![0u16; (WIDTH * ROWS_PER_STRIP) as usize];
    assert!(matches!(
        decoder.read_strip(0, &mut buf),
        Err(DecodeError::NoDirectorySelected)
    ));

    decoder.select_image(0).unwrap();
    decoder.read_strip(0, &mut buf).unwrap();
    assert_eq!(buf[WIDTH as usize + 3], sample(0, 3, 1));
}

#[test]
fn missing_file_names_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.tif");
    let err = TiffStripDecoder::open(&path).unwrap_err();
    assert!(err.to_string().contains("absent.tif"));
}

#[test]
fn eight_bit_images_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gray8.tif");
    let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
    for _ in 0..2 {
        encoder
            .write_image::<colortype::Gray8>(4, 4, &[0u8; 16])
            .unwrap();
    }

    let decoder = TiffStripDecoder::open(&path).unwrap();
    let err = PlaneCache::new(decoder, ViewMode::Slice).unwrap_err();
    assert!(matches!(err, DecodeError::UnsupportedLayout(_)));
}

#[test]
fn slice_cache_streams_requested_plane_pair() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stack.tif");
    write_container(&path, 6);

    let decoder = TiffStripDecoder::open(&path).unwrap();
    let mut cache = PlaneCache::new(decoder, ViewMode::Slice)
        .unwrap()
        .with_mipmaps(false);
    assert_eq!(cache.volume().plane_count, 3);

    let mut textures = CpuTextures::default();
    let report = cache.initialize(&mut textures, 0);
    assert!(report.is_complete());

    let outcome = cache.refresh(&mut textures, 2);
    let RefreshOutcome::Loaded(report) = outcome else {
        panic!("depth change should trigger a load pass");
    };
    assert_eq!(report.images, 2);
    assert_eq!(report.strips_loaded, 6);
    assert_eq!(cache.resident_plane(), Some(2));

    let r = textures.plane(Channel::R, 0).unwrap();
    let g = textures.plane(Channel::G, 0).unwrap();
    assert_eq!(r.iter().copied().collect::<Vec<_>>(), full_decode(&path, 4));
    assert_eq!(g.iter().copied().collect::<Vec<_>>(), full_decode(&path, 5));

    assert_eq!(cache.refresh(&mut textures, 2), RefreshOutcome::Unchanged);
}

#[test]
fn odd_trailing_directory_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stack.tif");
    write_container(&path, 5);

    let decoder = TiffStripDecoder::open(&path).unwrap();
    let mut cache = PlaneCache::new(decoder, ViewMode::Volume).unwrap();
    assert_eq!(cache.volume().plane_count, 2);

    let mut textures = CpuTextures::default();
    let report = cache.initialize(&mut textures, 0);
    assert_eq!(report.images, 4);
    assert!(report.is_complete());
    assert_eq!(textures.extent(Channel::R).unwrap().depth, 2);
    assert_eq!(textures.plane(Channel::G, 1).unwrap()[[4, 6]], sample(3, 6, 4));
}

#[test]
fn composite_of_real_plane_pair() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stack.tif");
    write_container(&path, 2);

    let decoder = TiffStripDecoder::open(&path).unwrap();
    let mut cache = PlaneCache::new(decoder, ViewMode::Slice).unwrap();
    let mut textures = CpuTextures::default();
    cache.initialize(&mut textures, 0);

    // Window covering the whole 16-bit range.
    let window = ChannelWindow::from_raw(0, plane_stream::channel_window::RAW_MAX);
    let image = compose_plane(
        &textures.plane(Channel::R, 0).unwrap(),
        &textures.plane(Channel::G, 0).unwrap(),
        &window,
    )
    .unwrap();

    assert_eq!(image.dimensions(), (WIDTH, HEIGHT));
    let pixel = image.get_pixel(0, 0);
    assert_eq!(pixel[2], 0);
    assert!(pixel[1] > pixel[0]);
}
