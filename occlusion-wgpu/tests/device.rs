//! Device results compared against the host reference executor.
//!
//! Every test returns early when no adapter can run the kernels.

mod common;

use std::time::Duration;

use anyhow::Context;
use occlusion::{
    cpu::CpuExecutor,
    delivery::{IndirectUnordered, ReadbackBlocking, ReadbackFenced, TokenBuffers, TokenCompaction},
    hi_z::{build_mips, DepthPyramid},
    scan::{ScanEngine, SCAN_BATCH},
    token::{emulate_draws, Token, TokenHeaders, TokenStream, TokenStreamBuilder},
    types::{BitMode, CullMethod, DrawIndexedIndirect},
    util::math::bit_words,
    CommandExecutor, CullError, CullingSystem, ResultDelivery,
};

use common::{Allocate, OBJECTS, VIEWPORT};

fn readback<E: Allocate>(exec: &mut E, count: u32) -> ResultDelivery {
    ReadbackBlocking::new(exec.zeroed(bit_words(count) as usize)).into()
}

/// Culls the even grid, returning the visible objects.
fn cull_grid<E: Allocate>(
    exec: &mut E,
    method: CullMethod,
    depth: impl FnOnce(&mut E) -> Option<DepthPyramid>,
) -> anyhow::Result<Vec<u32>> {
    let positions = common::even_visible_positions(OBJECTS);
    let delivery = readback(exec, OBJECTS);
    let mut job = common::job(exec, &positions, delivery);
    if let Some(pyramid) = depth(exec) {
        job = job.with_depth(pyramid);
    }

    let culling = CullingSystem::new();
    culling.cull(exec, method, BitMode::Current, &mut job, &common::camera())?;
    culling.result_client(exec, &mut job)?;
    let bits = job.delivery.host_bits().context("readback has host bits")?;
    Ok(common::set_bits(bits))
}

#[test]
fn frustum_matches_the_host() -> anyhow::Result<()> {
    let Some(mut device) = common::device_executor() else {
        return Ok(());
    };
    let mut host = CpuExecutor::new();

    let expected = cull_grid(&mut host, CullMethod::Frustum, |_| None)?;
    let visible = cull_grid(&mut device, CullMethod::Frustum, |_| None)?;
    assert_eq!(expected.len(), 512);
    assert_eq!(visible, expected);
    Ok(())
}

#[test]
fn depth_tests_follow_the_depth_buffer() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    for method in [CullMethod::HiZ, CullMethod::Raster] {
        // The grid sits at a window depth of about 0.996.
        for (depth, expected) in [(1.0, 512), (0.3, 0)] {
            let texels = vec![depth; (VIEWPORT * VIEWPORT) as usize];
            let visible = cull_grid(&mut exec, method, |exec| {
                let pyramid = exec.create_depth_pyramid(VIEWPORT, VIEWPORT);
                exec.upload_depth(&pyramid, &texels);
                build_mips(exec, &pyramid);
                Some(pyramid)
            })?;
            assert_eq!(visible.len(), expected, "{method:?} against depth {depth}");
            assert!(visible.iter().all(|i| i % 2 == 0));
        }
    }
    Ok(())
}

#[test]
fn indirect_compaction_appends_the_visible_records() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    let positions = common::even_visible_positions(OBJECTS);
    let records = exec.create_buffer_init(&common::records(OBJECTS));
    let compacted = exec.create_buffer(OBJECTS as usize * 5);
    let counter = exec.create_buffer(1);
    exec.fill_buffer(counter, 77);
    let delivery = IndirectUnordered::new(records, compacted, counter)
        .with_clear_results(true)
        .into();
    let mut job = common::job(&mut exec, &positions, delivery);

    let culling = CullingSystem::new();
    culling.cull(&mut exec, CullMethod::Frustum, BitMode::Current, &mut job, &common::camera())?;

    let count = common::read(&mut exec, counter)?[0];
    assert_eq!(count, 512);
    let compacted: Vec<DrawIndexedIndirect> = bytemuck::pod_collect_to_vec(&common::read(&mut exec, compacted)?);
    let mut instances: Vec<u32> = compacted[..count as usize].iter().map(|r| r.first_instance).collect();
    instances.sort_unstable();
    assert_eq!(instances, (0..OBJECTS).step_by(2).collect::<Vec<_>>());
    assert!(compacted[count as usize..]
        .iter()
        .all(|r| *r == DrawIndexedIndirect::default()));
    Ok(())
}

/// Three sequences, together longer than one scan batch.
fn long_stream(headers: &TokenHeaders) -> TokenStream {
    let mut builder = TokenStreamBuilder::new(headers);
    for sequence in 0..3u32 {
        builder.begin_sequence().push(
            Token::ElementAddress {
                address: 0x1000 * (sequence as u64 + 1),
                type_size: 4,
            },
            None,
        );
        for i in 0..SCAN_BATCH {
            let draw = Token::DrawElements {
                count: 36,
                first_index: (sequence * SCAN_BATCH + i) * 36,
                base_vertex: 0,
            };
            builder.push(draw, Some((sequence * SCAN_BATCH + i) % OBJECTS));
        }
        builder.end_sequence();
    }
    builder.finish()
}

fn compact_tokens<E: Allocate>(
    exec: &mut E,
    upload: impl FnOnce(&mut E, &TokenStream) -> TokenBuffers,
) -> anyhow::Result<(TokenStream, Vec<u32>)> {
    let headers = exec.capabilities().token_headers.clone();
    let stream = long_stream(&headers);
    assert!(stream.padded_token_count() > SCAN_BATCH);

    let buffers = upload(exec, &stream);
    let delivery = TokenCompaction::new(buffers, &stream, &headers).into();
    let positions = common::even_visible_positions(OBJECTS);
    let mut job = common::job(exec, &positions, delivery);

    let culling = CullingSystem::new();
    culling.cull(exec, CullMethod::Frustum, BitMode::Current, &mut job, &common::camera())?;
    let words = common::read(exec, buffers.destination)?;
    Ok((stream, words))
}

#[test]
fn token_compaction_matches_the_host() -> anyhow::Result<()> {
    let Some(mut device) = common::device_executor() else {
        return Ok(());
    };
    let mut host = CpuExecutor::new();

    let (stream, expected) = compact_tokens(&mut host, |exec, stream| exec.upload_token_stream(stream))?;
    let (_, words) = compact_tokens(&mut device, |exec, stream| exec.upload_token_stream(stream))?;

    let headers = device.capabilities().token_headers.clone();
    for (index, sequence) in stream.sequences.iter().enumerate() {
        let draws = emulate_draws(&words, &headers, sequence.start_byte_offset)
            .with_context(|| format!("sequence {index} is not terminated"))?;
        assert_eq!(draws.len(), SCAN_BATCH as usize / 2, "sequence {index}");
    }
    assert_eq!(words, expected);
    Ok(())
}

#[test]
fn multi_level_scan_of_ones() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    let elements = SCAN_BATCH * 3 + 100;
    let input = exec.create_buffer_init(&vec![1u32; elements as usize]);
    let output = exec.create_buffer(elements as usize);
    let offsets = exec.create_buffer(ScanEngine::offset_size(elements) as usize / 4);
    ScanEngine::new().scan(&mut exec, elements, input, output, offsets);

    let scanned = common::read(&mut exec, output)?;
    assert_eq!(scanned, (1..=elements).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn fills_keep_their_neighbours() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    let buffer = exec.create_buffer_init(&[5u32; 100]);
    // Starts off any storage offset alignment.
    exec.fill_buffer(buffer.slice(12, 40), 9);
    exec.fill_buffer(buffer.slice(200, 8), 0);

    let words = common::read(&mut exec, buffer)?;
    for (i, word) in words.into_iter().enumerate() {
        let expected = match i {
            3..=12 => 9,
            50 | 51 => 0,
            _ => 5,
        };
        assert_eq!(word, expected, "word {i}");
    }
    Ok(())
}

#[test]
fn fences_signal_and_unknown_fences_fail() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    let buffer = exec.create_buffer(64);
    exec.fill_buffer(buffer, 3);
    let fence = exec.create_fence();
    exec.wait_fence(fence, Duration::from_secs(5))?;
    // Waiting again on a signalled fence returns immediately.
    exec.wait_fence(fence, Duration::ZERO)?;

    exec.delete_fence(fence);
    let err = exec
        .wait_fence(fence, Duration::from_secs(1))
        .expect_err("deleted fence");
    assert!(matches!(err, CullError::UnknownFence { .. }), "{err}");
    Ok(())
}

#[test]
fn persistent_mappings_see_the_latest_results() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    let buffer = exec.create_buffer(16);
    let mapping = exec.map_persistent(buffer.slice(16, 16))?;
    for value in [1, 2] {
        exec.fill_buffer(buffer, value);
        let fence = exec.create_fence();
        exec.wait_fence(fence, Duration::from_secs(5))?;
        exec.delete_fence(fence);
        assert_eq!(exec.mapped_words(mapping)?, &[value; 4]);
    }
    Ok(())
}

#[test]
fn fenced_readback_follows_the_frames() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    let bits = exec.create_buffer(2);
    let slots = [exec.create_buffer(2), exec.create_buffer(2), exec.create_buffer(2)];
    let fenced = ReadbackFenced::new(&mut exec, slots, Duration::from_secs(5))?;
    let mut delivery = ResultDelivery::from(fenced);
    for frame in 0..7u32 {
        exec.write_buffer(bits, &[frame, !frame]);
        delivery.materialize(&mut exec, &ScanEngine::new(), bits, 64)?;
        delivery.client_sync(&mut exec)?;
        assert_eq!(delivery.host_bits(), Some(&[frame, !frame][..]), "frame {frame}");
    }
    Ok(())
}

/// Large enough that the device is still busy right after submission.
const BUSY_WORDS: usize = 1 << 20;

#[test]
fn expired_fence_waits_fail_instead_of_blocking() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    let bits = exec.create_buffer(BUSY_WORDS);
    let slots = [exec.create_buffer(BUSY_WORDS), exec.create_buffer(BUSY_WORDS)];
    let mut delivery = ResultDelivery::from(ReadbackFenced::new(&mut exec, slots, Duration::ZERO)?);
    exec.fill_buffer(bits, 0x5555_5555);
    delivery.materialize(&mut exec, &ScanEngine::new(), bits, (BUSY_WORDS * 32) as u32)?;

    match delivery.client_sync(&mut exec) {
        Ok(()) => {
            let host = delivery.host_bits().context("readback has host bits")?;
            assert!(host.iter().all(|&w| w == 0x5555_5555));
        }
        Err(CullError::FenceTimeout { timeout }) => assert_eq!(timeout, Duration::ZERO),
        Err(err) => panic!("unexpected error {err}"),
    }
    Ok(())
}

#[test]
fn expired_mapping_reads_can_be_retried() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    let buffer = exec.create_buffer(BUSY_WORDS);
    let mapping = exec.map_persistent(buffer)?;
    exec.fill_buffer(buffer, 9);
    let fence = exec.create_fence();

    exec.set_host_timeout(Duration::ZERO);
    match exec.mapped_words(mapping) {
        Ok(words) => assert!(words.iter().all(|&w| w == 9)),
        Err(CullError::FenceTimeout { timeout }) => assert_eq!(timeout, Duration::ZERO),
        Err(err) => panic!("unexpected error {err}"),
    }

    exec.set_host_timeout(occlusion_wgpu::DEFAULT_HOST_TIMEOUT);
    exec.wait_fence(fence, Duration::from_secs(5))?;
    exec.delete_fence(fence);
    let words = exec.mapped_words(mapping)?;
    assert_eq!(words.len(), BUSY_WORDS);
    assert!(words.iter().all(|&w| w == 9));
    Ok(())
}

#[test]
fn blocking_reads_reuse_their_staging() -> anyhow::Result<()> {
    let Some(mut exec) = common::device_executor() else {
        return Ok(());
    };

    let small = exec.create_buffer_init(&[1u32, 2, 3]);
    let large = exec.create_buffer_init(&(0..100u32).collect::<Vec<_>>());
    let mut words = vec![0; 100];
    exec.read_buffer(small, &mut words[..3])?;
    assert_eq!(&words[..3], &[1, 2, 3]);
    exec.read_buffer(large, &mut words)?;
    assert_eq!(words, (0..100).collect::<Vec<_>>());
    exec.read_buffer(small.slice(4, 8), &mut words[..2])?;
    assert_eq!(&words[..2], &[2, 3]);
    Ok(())
}
