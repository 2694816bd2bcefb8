use crate::device::{PipelineDescriptor, PipelineHandles};
use ash::prelude::VkResult;
use ash::{util::read_spv, vk, Device};
use std::ffi::CString;
use std::io::Cursor;

/// Loads a SPIR-V shader module from a byte slice.
///
/// Bytes that are not a whole number of little-endian words are rejected as
/// `ERROR_INVALID_SHADER_NV`.
pub(crate) fn load_shader_module(device: &Device, spirv_bytes: &[u8]) -> VkResult<vk::ShaderModule> {
    let mut cursor = Cursor::new(spirv_bytes);
    let code_u32 = read_spv(&mut cursor).map_err(|_| vk::Result::ERROR_INVALID_SHADER_NV)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code_u32);
    unsafe { device.create_shader_module(&create_info, None) }
}

/// One color attachment presented at the end of the pass and one depth
/// attachment cleared to the far plane.
pub(crate) fn create_render_pass(
    device: &Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> VkResult<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();
    let depth_attachment = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();
    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_attachment_ref))
        .depth_stencil_attachment(&depth_attachment_ref)
        .build();

    // The image may still be read by the presentation engine and the depth
    // buffer by the previous frame.
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = [color_attachment, depth_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];
    let render_pass_create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_create_info, None) }
}

/// Builds the pipeline described by `desc` for `render_pass`.
///
/// Viewport and scissor are dynamic; `extent` only seeds the static state.
/// Shader modules are destroyed once the pipeline exists.
pub(crate) fn create_graphics_pipeline(
    device: &Device,
    desc: &PipelineDescriptor,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> VkResult<PipelineHandles> {
    let mut modules = Vec::with_capacity(desc.stages.len());
    let result = build(device, desc, render_pass, extent, &mut modules);
    for module in modules {
        unsafe { device.destroy_shader_module(module, None) };
    }
    result
}

fn build(
    device: &Device,
    desc: &PipelineDescriptor,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    modules: &mut Vec<vk::ShaderModule>,
) -> VkResult<PipelineHandles> {
    let patch_control_points = desc.patch_control_points()?;

    let mut entry_points = Vec::with_capacity(desc.stages.len());
    for stage in &desc.stages {
        modules.push(load_shader_module(device, &stage.spirv)?);
        entry_points.push(
            CString::new(stage.entry_point.as_str())
                .map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)?,
        );
    }
    let specialization_info = desc.specialization.as_ref().map(|spec| {
        vk::SpecializationInfo::builder()
            .map_entries(&spec.entries)
            .data(&spec.data)
            .build()
    });
    let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
        .stages
        .iter()
        .zip(modules.iter())
        .zip(entry_points.iter())
        .map(|((stage, &module), name)| {
            let info = vk::PipelineShaderStageCreateInfo::builder()
                .stage(stage.stage)
                .module(module)
                .name(name);
            match &specialization_info {
                Some(spec) => info.specialization_info(spec).build(),
                None => info.build(),
            }
        })
        .collect();

    let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&desc.vertex_bindings)
        .vertex_attribute_descriptions(&desc.vertex_attributes);

    let input_assembly_state_info = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(desc.topology)
        .primitive_restart_enable(desc.primitive_restart);

    let tessellation_state_info = patch_control_points.map(|points| {
        vk::PipelineTessellationStateCreateInfo::builder()
            .patch_control_points(points)
            .build()
    });

    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }];
    let viewport_state_info = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterization_state_info = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false)
        .line_width(1.0);

    let multisample_state_info = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .sample_shading_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build()];
    let color_blend_state_info = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let depth_stencil_state_info = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_test)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .stencil_test_enable(false);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state_info =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let pipeline_layout_create_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&desc.set_layouts)
        .push_constant_ranges(&desc.push_constant_ranges);
    let layout = unsafe { device.create_pipeline_layout(&pipeline_layout_create_info, None)? };

    let mut graphics_pipeline_create_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state_info)
        .input_assembly_state(&input_assembly_state_info)
        .viewport_state(&viewport_state_info)
        .rasterization_state(&rasterization_state_info)
        .multisample_state(&multisample_state_info)
        .color_blend_state(&color_blend_state_info)
        .depth_stencil_state(&depth_stencil_state_info)
        .dynamic_state(&dynamic_state_info)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);
    if let Some(tessellation) = &tessellation_state_info {
        graphics_pipeline_create_info = graphics_pipeline_create_info.tessellation_state(tessellation);
    }
    let graphics_pipeline_create_info = graphics_pipeline_create_info.build();

    let pipeline_results = unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            &[graphics_pipeline_create_info],
            None,
        )
    };

    match pipeline_results {
        Ok(pipelines) => match pipelines.first() {
            Some(&pipeline) => Ok(PipelineHandles { layout, pipeline }),
            None => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(vk::Result::ERROR_UNKNOWN)
            }
        },
        Err((pipelines, err_result)) => {
            unsafe {
                for pipeline in pipelines {
                    if pipeline != vk::Pipeline::null() {
                        device.destroy_pipeline(pipeline, None);
                    }
                }
                device.destroy_pipeline_layout(layout, None);
            }
            Err(err_result)
        }
    }
}
