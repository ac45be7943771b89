use ember::renderer::device::null::{Command, LiveCounts};
use ember::renderer::device::{ViewId, ViewKind};
use ember::renderer::shader_compiler::ShaderLanguage;
use ember::renderer::{
    BufferKind, ColorTarget, DeviceCall, Format, NullDevice, RenderConfig, RenderContext, RenderError,
    RenderTargetBindings, TextureDesc, VertexField, VertexFieldType,
};

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];

const VERTEX: &str = r#"
@vertex
fn vs_main(@location(0) position: vec4<f32>) -> @builtin(position) vec4<f32> {
    return position;
}
"#;

fn context() -> RenderContext<NullDevice> {
    RenderContext::new(NullDevice::new(64, 64).unwrap(), RenderConfig::default()).unwrap()
}

const COMPUTE: &str = r#"
@compute @workgroup_size(8, 8)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
}
"#;

/// Views created since the call log was last cleared, in creation order
fn created_views(ctx: &RenderContext<NullDevice>, kind: ViewKind) -> Vec<ViewId> {
    ctx.device()
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::CreateView { view, desc, .. } if desc.kind == kind => Some(*view),
            _ => None,
        })
        .collect()
}

fn is_solid(data: &[u8], pixel: [u8; 4]) -> bool {
    !data.is_empty() && data.chunks_exact(4).all(|p| p == pixel)
}

fn last_render_targets(ctx: &RenderContext<NullDevice>) -> Option<(Vec<Option<ViewId>>, Option<ViewId>)> {
    ctx.device().calls().iter().rev().find_map(|call| match call {
        DeviceCall::SetRenderTargets { colors, depth } => Some((colors.clone(), *depth)),
        _ => None,
    })
}

#[test]
fn every_format_has_a_pixel_size() {
    let ctx = context();
    for &format in Format::ALL {
        let info = ctx.get_format_info(format);
        assert!(info.pixel_size_in_bytes > 0, "{format:?}");
        assert_eq!(info.is_depth_format, format.is_depth());
    }
}

#[test]
fn multisampled_texture_has_both_images() {
    let mut ctx = context();
    let texture = ctx
        .create_texture(&TextureDesc::new_2d(32, 32).samples(4).render_target())
        .unwrap();

    assert!(texture.has_multisample_dual());
    assert!(!texture.info().unwrap().uav);
    let samples: Vec<u32> = ctx
        .device()
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::CreateImage { desc, .. } => Some(desc.samples),
            _ => None,
        })
        .collect();
    assert!(samples.ends_with(&[1, 4]));

    ctx.destroy_texture(texture);
    assert_eq!(ctx.device().live_counts().images, 1);
}

#[test]
fn multisampled_uav_is_rejected() {
    let mut ctx = context();
    let desc = TextureDesc::new_2d(32, 32).samples(4).render_target().uav();
    assert!(ctx.create_texture(&desc).is_err());
}

#[test]
fn depth_textures_never_get_shader_views() {
    let mut ctx = context();
    let depth = ctx
        .create_texture(&TextureDesc::new_2d(16, 16).format(Format::D32Float).render_target())
        .unwrap();
    ctx.device_mut().clear_calls();

    assert!(ctx.bind_texture(&depth, 0).is_err());
    assert!(ctx.bind_compute_uav(&depth, 0).is_err());
    assert_eq!(ctx.device().count_calls(DeviceCall::is_creation), 0);
    assert_eq!(ctx.device().live_counts().views, 0);

    ctx.destroy_texture(depth);
}

#[test]
fn depth_uav_texture_is_rejected_before_creation() {
    let mut ctx = context();
    ctx.device_mut().clear_calls();

    let desc = TextureDesc::new_2d(64, 64)
        .format(Format::D24UnormS8Uint)
        .render_target()
        .uav();
    assert!(matches!(ctx.create_texture(&desc), Err(RenderError::InvalidUsage(_))));
    assert_eq!(ctx.device().count_calls(DeviceCall::is_creation), 0);
}

#[test]
fn rebinding_a_slot_releases_only_its_previous_view() {
    let mut ctx = context();
    let a = ctx.create_texture(&TextureDesc::new_2d(8, 8)).unwrap();
    let b = ctx.create_texture(&TextureDesc::new_2d(8, 8)).unwrap();
    let c = ctx.create_texture(&TextureDesc::new_2d(8, 8)).unwrap();
    ctx.device_mut().clear_calls();

    ctx.bind_texture(&a, 2).unwrap();
    ctx.bind_texture(&b, 5).unwrap();
    let views = created_views(&ctx, ViewKind::ShaderResource);
    let (view_a, view_b) = (views[0], views[1]);

    ctx.device_mut().clear_calls();
    ctx.bind_texture(&c, 2).unwrap();

    let destroyed: Vec<ViewId> = ctx
        .device()
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::DestroyView(view) => Some(*view),
            _ => None,
        })
        .collect();
    assert_eq!(destroyed, vec![view_a]);
    assert!(ctx.device().view_image(view_b).is_some());
    assert_eq!(ctx.device().live_counts().views, 2);

    ctx.unbind_all_textures();
    assert_eq!(ctx.device().live_counts().views, 0);
    for texture in [a, b, c] {
        ctx.destroy_texture(texture);
    }
}

#[test]
fn swapchain_resize_is_idempotent() {
    let mut ctx = context();
    ctx.ensure_swap_chain_size(128, 96).unwrap();
    assert_eq!(ctx.swap_chain_size(), (128, 96));
    assert_eq!(ctx.swapchain_depth().size(), Some((128, 96)));

    ctx.device_mut().clear_calls();
    ctx.ensure_swap_chain_size(128, 96).unwrap();
    assert!(ctx.device().calls().is_empty());
}

#[test]
fn zero_sized_resize_is_ignored() {
    let mut ctx = context();
    ctx.device_mut().clear_calls();
    ctx.ensure_swap_chain_size(0, 720).unwrap();
    assert_eq!(ctx.swap_chain_size(), (64, 64));
    assert!(ctx.device().calls().is_empty());
}

#[test]
fn unset_resolves_the_multisampled_target_once() {
    let mut ctx = context();
    let target = ctx
        .create_texture(&TextureDesc::new_2d(256, 256).samples(4).render_target())
        .unwrap();
    ctx.device_mut().clear_calls();

    ctx.set_render_targets(&RenderTargetBindings::new().color(ColorTarget::new(&target).clear(RED)))
        .unwrap();

    let color_view = created_views(&ctx, ViewKind::RenderTarget)[0];
    let dual = ctx.device().view_image(color_view).unwrap();
    assert_eq!(ctx.device().image_desc(dual).unwrap().samples, 4);
    assert!(ctx.device().calls().contains(&DeviceCall::ClearRenderTarget {
        view: color_view,
        color: RED,
    }));

    ctx.unset_render_targets().unwrap();

    let resolves: Vec<&DeviceCall> = ctx
        .device()
        .calls()
        .iter()
        .filter(|call| matches!(call, DeviceCall::ResolveImage { .. }))
        .collect();
    assert_eq!(resolves.len(), 1);
    let DeviceCall::ResolveImage { dst, src, .. } = resolves[0] else {
        unreachable!()
    };
    assert_eq!(*src, dual);
    assert_ne!(*dst, dual);
    let primary = ctx.device().image_data(*dst).unwrap();
    assert_eq!(primary.len(), 256 * 256 * 4);
    assert!(is_solid(primary, [255, 0, 0, 255]));
    assert!(ctx.device().calls().contains(&DeviceCall::DestroyView(color_view)));
    assert_eq!(ctx.device().live_counts().views, 0);

    ctx.destroy_texture(target);
}

#[test]
fn targets_cannot_be_bound_twice() {
    let mut ctx = context();
    ctx.set_render_targets(&RenderTargetBindings::new()).unwrap();
    assert!(matches!(
        ctx.set_render_targets(&RenderTargetBindings::new()),
        Err(RenderError::RenderTargetsAlreadyBound)
    ));
    assert!(ctx.present(false).is_err());

    ctx.unset_render_targets().unwrap();
    ctx.present(true).unwrap();
    assert!(ctx.device().calls().contains(&DeviceCall::Present { vsync: true }));
}

#[test]
fn too_many_vertex_fields_is_an_error() {
    let mut ctx = context();
    let shader = ctx
        .compile_vertex_shader_from_source("position.wgsl", VERTEX, ShaderLanguage::Wgsl)
        .unwrap();
    let fields: Vec<VertexField> = (0..33)
        .map(|i| VertexField::per_vertex("position", i * 16, VertexFieldType::Float4))
        .collect();

    assert!(matches!(
        ctx.create_vertex_format(&fields, &shader),
        Err(RenderError::TooManyVertexFields { count: 33, max: 32 })
    ));
    assert_eq!(ctx.device().live_counts().input_layouts, 0);
    ctx.destroy_vertex_shader(shader);
}

#[test]
fn rewriting_a_buffer_with_the_same_data_leaves_it_unchanged() {
    let mut ctx = context();
    let data: Vec<u8> = (0..64).collect();
    let buffer = ctx
        .create_buffer(BufferKind::Vertex, Some(&data), data.len() as u64)
        .unwrap();
    let id = buffer.id().unwrap();

    ctx.update_buffer(&buffer, &data).unwrap();
    assert_eq!(ctx.device().buffer_data(id), Some(data.as_slice()));

    ctx.destroy_buffer(buffer);
    assert_eq!(ctx.device().live_counts().buffers, 0);
}

#[test]
fn shutdown_releases_everything_the_context_owns() {
    let mut ctx = context();
    let texture = ctx.create_texture(&TextureDesc::new_2d(8, 8)).unwrap();
    ctx.bind_texture(&texture, 0).unwrap();
    ctx.destroy_texture(texture);

    let device = ctx.shutdown();
    assert_eq!(device.live_counts(), LiveCounts::default());
}

#[test]
fn empty_color_slots_keep_their_position() {
    let mut ctx = context();
    let a = ctx.create_texture(&TextureDesc::new_2d(8, 8).render_target()).unwrap();
    let b = ctx.create_texture(&TextureDesc::new_2d(8, 8).render_target()).unwrap();
    ctx.device_mut().clear_calls();

    ctx.set_render_targets(
        &RenderTargetBindings::new()
            .color(ColorTarget::new(&a))
            .color(ColorTarget::default())
            .color(ColorTarget::new(&b)),
    )
    .unwrap();

    let views = created_views(&ctx, ViewKind::RenderTarget);
    assert_eq!(views.len(), 2);
    let (colors, depth) = last_render_targets(&ctx).unwrap();
    assert_eq!(colors, vec![Some(views[0]), None, Some(views[1])]);
    assert!(depth.is_some());

    ctx.unset_render_targets().unwrap();
    assert_eq!(last_render_targets(&ctx), Some((vec![], None)));
    assert_eq!(ctx.device().live_counts().views, 0);
    ctx.destroy_texture(a);
    ctx.destroy_texture(b);
}

#[test]
fn failed_resolve_is_reported_and_still_unbinds() {
    let mut ctx = context();
    let target = ctx
        .create_texture(&TextureDesc::new_2d(16, 16).samples(4).render_target())
        .unwrap();
    ctx.set_render_targets(&RenderTargetBindings::new().color(ColorTarget::new(&target)))
        .unwrap();

    ctx.device_mut().fail_next(Command::Resolve);
    assert!(matches!(ctx.unset_render_targets(), Err(RenderError::Vulkan(_))));
    assert_eq!(ctx.device().live_counts().views, 0);

    ctx.set_render_targets(&RenderTargetBindings::new().color(ColorTarget::new(&target)))
        .unwrap();
    ctx.unset_render_targets().unwrap();
    ctx.destroy_texture(target);
}

#[test]
fn failed_clear_leaves_nothing_bound() {
    let mut ctx = context();
    ctx.device_mut().fail_next(Command::Clear);

    let bindings = RenderTargetBindings::new().color(ColorTarget::swapchain().clear(GREEN));
    assert!(ctx.set_render_targets(&bindings).is_err());
    assert_eq!(ctx.device().live_counts().views, 0);

    ctx.set_render_targets(&bindings).unwrap();
    let back_buffer = ctx.device().back_buffer_id();
    // Back buffer is B8G8R8A8
    assert!(is_solid(ctx.device().image_data(back_buffer).unwrap(), [0, 255, 0, 255]));
    ctx.unset_render_targets().unwrap();
    ctx.present(true).unwrap();
}

#[test]
fn copy_texture_copies_single_sampled_sources() {
    let mut ctx = context();
    let pixels: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
    let src = ctx.create_texture(&TextureDesc::new_2d(4, 4).data(&pixels)).unwrap();
    let dst = ctx.create_texture(&TextureDesc::new_2d(4, 4).cpu_read()).unwrap();
    ctx.device_mut().clear_calls();

    ctx.copy_texture(&dst, &src).unwrap();
    assert_eq!(ctx.device().count_calls(|call| matches!(call, DeviceCall::CopyImage { .. })), 1);
    assert_eq!(ctx.map_texture(&dst).unwrap().data, pixels.as_slice());
    ctx.unmap_texture(&dst);

    let wrong_size = ctx.create_texture(&TextureDesc::new_2d(8, 4).cpu_read()).unwrap();
    assert!(ctx.copy_texture(&wrong_size, &src).is_err());
    for texture in [src, dst, wrong_size] {
        ctx.destroy_texture(texture);
    }
}

#[test]
fn copy_texture_resolves_multisampled_sources() {
    let mut ctx = context();
    let src = ctx
        .create_texture(&TextureDesc::new_2d(8, 8).samples(4).render_target())
        .unwrap();
    let dst = ctx.create_texture(&TextureDesc::new_2d(8, 8).cpu_read()).unwrap();
    ctx.set_render_targets(&RenderTargetBindings::new().color(ColorTarget::new(&src).clear(GREEN)))
        .unwrap();
    ctx.unset_render_targets().unwrap();
    ctx.device_mut().clear_calls();

    ctx.copy_texture(&dst, &src).unwrap();
    let calls = ctx.device().calls();
    assert_eq!(calls.len(), 1);
    let DeviceCall::ResolveImage { src: resolved, format, .. } = calls[0] else {
        panic!("expected a resolve, got {:?}", calls[0]);
    };
    assert_eq!(format, Format::R8G8B8A8Unorm);
    assert_eq!(ctx.device().image_desc(resolved).unwrap().samples, 4);
    assert!(is_solid(ctx.map_texture(&dst).unwrap().data, [0, 255, 0, 255]));
    ctx.unmap_texture(&dst);

    ctx.destroy_texture(src);
    ctx.destroy_texture(dst);
}

#[test]
fn compute_uav_binds_and_dispatches() {
    let mut ctx = context();
    let texture = ctx.create_texture(&TextureDesc::new_2d(16, 16).uav()).unwrap();
    let shader = ctx
        .compile_compute_shader_from_source("fill.wgsl", COMPUTE, ShaderLanguage::Wgsl)
        .unwrap();
    assert!(ctx.dispatch_compute(1, 1, 1).is_err());
    ctx.device_mut().clear_calls();

    ctx.bind_compute_uav(&texture, 3).unwrap();
    let view = created_views(&ctx, ViewKind::UnorderedAccess)[0];
    assert!(ctx.device().calls().contains(&DeviceCall::SetUnorderedAccess {
        slot: 3,
        view: Some(view),
    }));

    ctx.bind_compute_shader(Some(&shader));
    ctx.dispatch_compute(2, 2, 1).unwrap();
    assert_eq!(ctx.device().calls().last(), Some(&DeviceCall::Dispatch { x: 2, y: 2, z: 1 }));

    ctx.unbind_all_compute_uavs();
    assert_eq!(ctx.device().live_counts().views, 0);
    ctx.destroy_compute_shader(shader);
    ctx.destroy_texture(texture);
}

#[test]
fn cubemap_uav_is_unsupported() {
    let mut ctx = context();
    let cubemap = ctx.create_texture(&TextureDesc::new_cubemap(16).uav()).unwrap();
    ctx.device_mut().clear_calls();

    assert!(matches!(
        ctx.bind_compute_uav(&cubemap, 0),
        Err(RenderError::UnsupportedCubemapUav)
    ));
    assert_eq!(ctx.device().count_calls(DeviceCall::is_creation), 0);
    ctx.destroy_texture(cubemap);
}

#[test]
fn only_cpu_read_textures_map() {
    let mut ctx = context();
    let sampled = ctx.create_texture(&TextureDesc::new_2d(4, 4)).unwrap();
    assert!(matches!(ctx.map_texture(&sampled), Err(RenderError::InvalidUsage(_))));

    let staging = ctx.create_texture(&TextureDesc::new_2d(4, 2).cpu_read()).unwrap();
    ctx.device_mut().clear_calls();
    {
        let mapped = ctx.map_texture(&staging).unwrap();
        assert_eq!(mapped.row_pitch, 16);
        assert_eq!(mapped.data.len(), 32);
    }
    ctx.unmap_texture(&staging);
    assert!(matches!(ctx.device().calls(), [DeviceCall::MapImage(a), DeviceCall::UnmapImage(b)] if a == b));

    ctx.destroy_texture(sampled);
    ctx.destroy_texture(staging);
}

#[test]
fn resizing_a_multisampled_texture_recreates_both_images() {
    let mut ctx = context();
    let mut texture = ctx
        .create_texture(&TextureDesc::new_2d(16, 16).samples(4).render_target())
        .unwrap();
    let images_before = ctx.device().live_counts().images;
    ctx.device_mut().clear_calls();

    ctx.ensure_texture_size(&mut texture, 32, 24).unwrap();

    let destroyed = ctx.device().count_calls(|call| matches!(call, DeviceCall::DestroyImage(_)));
    let created: Vec<(u32, u32, u32)> = ctx
        .device()
        .calls()
        .iter()
        .filter_map(|call| match call {
            DeviceCall::CreateImage { desc, .. } => Some((desc.width, desc.height, desc.samples)),
            _ => None,
        })
        .collect();
    assert_eq!(destroyed, 2);
    assert_eq!(created, vec![(32, 24, 1), (32, 24, 4)]);
    assert!(texture.has_multisample_dual());
    assert_eq!(texture.size(), Some((32, 24)));
    assert_eq!(ctx.device().live_counts().images, images_before);

    ctx.destroy_texture(texture);
}
