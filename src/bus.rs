use crate::plugin::{
    BusDescriptor, BusDirection, BusType, MediaType, PluginComponent, SpeakerArrangement, speaker,
};

/// Scratch storage for one audio bus, sized once for the bus's advertised
/// channel count and the maximum block size.
#[derive(Debug, Clone)]
pub struct AudioBusBuffer {
    channels: Vec<Vec<f32>>,
    used: usize,
    pub silence_flags: u64,
}

impl AudioBusBuffer {
    pub fn new(channel_count: usize, frames: usize) -> Self {
        Self {
            channels: (0..channel_count).map(|_| vec![0.0; frames]).collect(),
            used: channel_count,
            silence_flags: 0,
        }
    }

    /// Number of channels the plugin sees on this bus.
    pub fn channel_count(&self) -> usize {
        self.used
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels[..self.used]
    }

    pub fn channels_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.channels[..self.used]
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels().get(index).map(Vec::as_slice)
    }

    pub fn channel_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        self.channels_mut().get_mut(index).map(Vec::as_mut_slice)
    }

    pub fn silence(&mut self, frames: usize) {
        for channel in &mut self.channels {
            let n = frames.min(channel.len());
            channel[..n].fill(0.0);
        }
        self.silence_flags = if self.used >= 64 {
            u64::MAX
        } else {
            (1u64 << self.used) - 1
        };
    }

    fn set_used(&mut self, used: usize) {
        self.used = used.min(self.channels.len());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBusInfo {
    pub name: String,
    pub bus_type: BusType,
    pub channel_count: u32,
    pub used_channel_count: u32,
    pub default_active: bool,
    /// Channel counts the plugin accepted at negotiation; 0 means the bus is off.
    pub supported: Vec<u32>,
}

impl AudioBusInfo {
    fn arrangement(&self) -> SpeakerArrangement {
        if self.used_channel_count == 0 {
            speaker::for_channels(self.channel_count)
        } else {
            speaker::for_channels(self.used_channel_count)
        }
    }
}

/// Negotiated audio and event bus layout for one plugin instance.
#[derive(Debug, Clone, Default)]
pub struct BusMapper {
    audio_in: Vec<AudioBusInfo>,
    audio_out: Vec<AudioBusInfo>,
    event_in: Vec<BusDescriptor>,
    event_out: Vec<BusDescriptor>,
}

impl BusMapper {
    /// Reads the plugin's buses, tries which channel counts each audio bus
    /// accepts and applies the initial layout.
    pub fn negotiate(component: &mut dyn PluginComponent, single_channel_main_bus: bool) -> Self {
        let mut mapper = Self {
            audio_in: read_audio_buses(component, BusDirection::Input, single_channel_main_bus),
            audio_out: read_audio_buses(component, BusDirection::Output, single_channel_main_bus),
            event_in: read_buses(component, MediaType::Event, BusDirection::Input),
            event_out: read_buses(component, MediaType::Event, BusDirection::Output),
        };

        mapper.collect_supported(component, BusDirection::Input);
        mapper.collect_supported(component, BusDirection::Output);

        if !mapper.apply(component) {
            tracing::warn!("Plugin rejected its own default bus arrangement");
        }
        for (direction, buses) in [
            (BusDirection::Input, &mapper.event_in),
            (BusDirection::Output, &mapper.event_out),
        ] {
            for index in 0..buses.len() {
                component.activate_bus(MediaType::Event, direction, index, true);
            }
        }
        tracing::debug!(
            "Negotiated buses: {} audio in ({} ch), {} audio out ({} ch), {} event in, {} event out",
            mapper.audio_in.len(),
            mapper.count_channels(MediaType::Audio, BusDirection::Input, None),
            mapper.audio_out.len(),
            mapper.count_channels(MediaType::Audio, BusDirection::Output, None),
            mapper.event_in.len(),
            mapper.event_out.len(),
        );
        mapper
    }

    fn collect_supported(&mut self, component: &mut dyn PluginComponent, direction: BusDirection) {
        let count = self.buses(direction).len();
        for index in 0..count {
            let bus = &self.buses(direction)[index];
            if !bus.supported.is_empty() {
                continue;
            }
            let mut supported = vec![0];
            for channels in 1..=bus.channel_count {
                let (mut ins, mut outs) = self.arrangements();
                let target = match direction {
                    BusDirection::Input => &mut ins,
                    BusDirection::Output => &mut outs,
                };
                target[index] = speaker::for_channels(channels);
                if component.set_bus_arrangements(&ins, &outs) {
                    supported.push(channels);
                }
            }
            if supported.len() == 1 {
                // Plugins that refuse every candidate still accept their advertised layout.
                supported.push(self.buses(direction)[index].channel_count);
            }
            self.buses_mut(direction)[index].supported = supported;
        }
    }

    fn arrangements(&self) -> (Vec<SpeakerArrangement>, Vec<SpeakerArrangement>) {
        (
            self.audio_in.iter().map(AudioBusInfo::arrangement).collect(),
            self.audio_out.iter().map(AudioBusInfo::arrangement).collect(),
        )
    }

    fn apply(&self, component: &mut dyn PluginComponent) -> bool {
        let (ins, outs) = self.arrangements();
        let accepted = component.set_bus_arrangements(&ins, &outs);
        for (direction, buses) in [
            (BusDirection::Input, &self.audio_in),
            (BusDirection::Output, &self.audio_out),
        ] {
            for (index, bus) in buses.iter().enumerate() {
                component.activate_bus(MediaType::Audio, direction, index, bus.used_channel_count > 0);
            }
        }
        accepted
    }

    /// Re-reads bus names without touching the negotiated layout.
    pub fn refresh_names(&mut self, component: &dyn PluginComponent) {
        for (direction, buses) in [
            (BusDirection::Input, &mut self.audio_in),
            (BusDirection::Output, &mut self.audio_out),
        ] {
            for (index, bus) in buses.iter_mut().enumerate() {
                if let Some(info) = component.bus_info(MediaType::Audio, direction, index) {
                    bus.name = info.name;
                }
            }
        }
    }

    pub fn buses(&self, direction: BusDirection) -> &[AudioBusInfo] {
        match direction {
            BusDirection::Input => &self.audio_in,
            BusDirection::Output => &self.audio_out,
        }
    }

    fn buses_mut(&mut self, direction: BusDirection) -> &mut Vec<AudioBusInfo> {
        match direction {
            BusDirection::Input => &mut self.audio_in,
            BusDirection::Output => &mut self.audio_out,
        }
    }

    pub fn event_buses(&self, direction: BusDirection) -> &[BusDescriptor] {
        match direction {
            BusDirection::Input => &self.event_in,
            BusDirection::Output => &self.event_out,
        }
    }

    /// Sums channel counts of the buses matching `media`, `direction` and,
    /// when given, `bus_type`. Audio buses report their negotiated count.
    pub fn count_channels(
        &self,
        media: MediaType,
        direction: BusDirection,
        bus_type: Option<BusType>,
    ) -> u32 {
        let matches = |t: BusType| bus_type.is_none_or(|wanted| wanted == t);
        match media {
            MediaType::Audio => self
                .buses(direction)
                .iter()
                .filter(|b| matches(b.bus_type))
                .map(|b| b.used_channel_count)
                .sum(),
            MediaType::Event => self
                .event_buses(direction)
                .iter()
                .filter(|b| matches(b.bus_type))
                .map(|b| b.channel_count)
                .sum(),
        }
    }

    pub fn n_audio_aux_in(&self) -> usize {
        self.audio_in.iter().filter(|b| b.bus_type == BusType::Aux).count()
    }

    pub fn n_audio_aux_out(&self) -> usize {
        self.audio_out.iter().filter(|b| b.bus_type == BusType::Aux).count()
    }

    /// Total channel slots across every audio bus, active or not.
    pub fn max_channels(&self, direction: BusDirection) -> u32 {
        self.buses(direction).iter().map(|b| b.channel_count).sum()
    }

    /// Enables the channels set in `in_mask` / `out_mask`. Bits are laid out
    /// bus after bus in bus order. The new layout must match a channel count
    /// every bus accepted during negotiation and must be accepted by the
    /// plugin; otherwise the previous layout is restored and false returned.
    pub fn enable_io(
        &mut self,
        component: &mut dyn PluginComponent,
        in_mask: u64,
        out_mask: u64,
    ) -> bool {
        let Some(ins) = layout_for_mask(&self.audio_in, in_mask) else {
            tracing::warn!("Input mask {in_mask:#x} does not match a supported layout");
            return false;
        };
        let Some(outs) = layout_for_mask(&self.audio_out, out_mask) else {
            tracing::warn!("Output mask {out_mask:#x} does not match a supported layout");
            return false;
        };

        let previous = (self.audio_in.clone(), self.audio_out.clone());
        for (bus, used) in self.audio_in.iter_mut().zip(ins) {
            bus.used_channel_count = used;
        }
        for (bus, used) in self.audio_out.iter_mut().zip(outs) {
            bus.used_channel_count = used;
        }
        if self.apply(component) {
            return true;
        }

        tracing::warn!("Plugin rejected bus layout in={in_mask:#x} out={out_mask:#x}");
        (self.audio_in, self.audio_out) = previous;
        self.apply(component);
        false
    }

    pub fn allocate_buffers(&self, direction: BusDirection, frames: usize) -> Vec<AudioBusBuffer> {
        self.buses(direction)
            .iter()
            .map(|bus| {
                let mut buffer = AudioBusBuffer::new(bus.channel_count as usize, frames);
                buffer.set_used(bus.used_channel_count as usize);
                buffer
            })
            .collect()
    }

    pub fn configure_buffers(&self, direction: BusDirection, buffers: &mut [AudioBusBuffer]) {
        for (bus, buffer) in self.buses(direction).iter().zip(buffers.iter_mut()) {
            buffer.set_used(bus.used_channel_count as usize);
        }
    }

    /// Copies flat host channels into bus scratch, in bus order. Missing host
    /// channels read as silence.
    pub fn scatter_inputs(&self, host: &[&[f32]], buffers: &mut [AudioBusBuffer], frames: usize) {
        let mut next = 0;
        for buffer in buffers.iter_mut() {
            buffer.silence_flags = 0;
            for channel in buffer.channels_mut() {
                let n = frames.min(channel.len());
                match host.get(next) {
                    Some(src) => {
                        let m = n.min(src.len());
                        channel[..m].copy_from_slice(&src[..m]);
                        channel[m..n].fill(0.0);
                    }
                    None => channel[..n].fill(0.0),
                }
                next += 1;
            }
        }
    }

    /// Copies bus scratch back out to flat host channels. Host channels with
    /// no bus behind them are silenced.
    pub fn gather_outputs(&self, buffers: &[AudioBusBuffer], host: &mut [&mut [f32]], frames: usize) {
        let mut next = 0;
        for buffer in buffers {
            for channel in buffer.channels() {
                let Some(dst) = host.get_mut(next) else {
                    return;
                };
                let n = frames.min(channel.len()).min(dst.len());
                dst[..n].copy_from_slice(&channel[..n]);
                next += 1;
            }
        }
        for dst in host.iter_mut().skip(next) {
            let n = frames.min(dst.len());
            dst[..n].fill(0.0);
        }
    }
}

fn read_buses(
    component: &dyn PluginComponent,
    media: MediaType,
    direction: BusDirection,
) -> Vec<BusDescriptor> {
    (0..component.bus_count(media, direction))
        .filter_map(|index| component.bus_info(media, direction, index))
        .collect()
}

fn read_audio_buses(
    component: &dyn PluginComponent,
    direction: BusDirection,
    single_channel_main_bus: bool,
) -> Vec<AudioBusInfo> {
    read_buses(component, MediaType::Audio, direction)
        .into_iter()
        .map(|bus| {
            let forced = single_channel_main_bus && bus.bus_type == BusType::Main;
            let channel_count = if forced { 1 } else { bus.channel_count };
            let active = bus.bus_type == BusType::Main || bus.default_active;
            AudioBusInfo {
                name: bus.name,
                bus_type: bus.bus_type,
                channel_count,
                used_channel_count: if active { channel_count } else { 0 },
                default_active: bus.default_active,
                supported: if forced { vec![0, 1] } else { Vec::new() },
            }
        })
        .collect()
}

fn layout_for_mask(buses: &[AudioBusInfo], mask: u64) -> Option<Vec<u32>> {
    let mut layout = Vec::with_capacity(buses.len());
    let mut start = 0u32;
    for bus in buses {
        let width = bus.channel_count.min(64u32.saturating_sub(start));
        let bits = if width == 0 {
            0
        } else {
            (mask >> start) & (u64::MAX >> (64 - width))
        };
        let used = bits.count_ones();
        if !bus.supported.contains(&used) {
            return None;
        }
        layout.push(used);
        start = start.saturating_add(bus.channel_count);
    }
    let total = start.min(64);
    let stray = if total == 64 { 0 } else { mask >> total };
    (stray == 0).then_some(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(bus_type: BusType, channels: u32, supported: &[u32]) -> AudioBusInfo {
        AudioBusInfo {
            name: String::new(),
            bus_type,
            channel_count: channels,
            used_channel_count: channels,
            default_active: true,
            supported: supported.to_vec(),
        }
    }

    #[test]
    fn masks_map_to_per_bus_counts() {
        let buses = vec![bus(BusType::Main, 2, &[0, 1, 2]), bus(BusType::Aux, 2, &[0, 2])];
        assert_eq!(layout_for_mask(&buses, 0b1111), Some(vec![2, 2]));
        assert_eq!(layout_for_mask(&buses, 0b0001), Some(vec![1, 0]));
        assert_eq!(layout_for_mask(&buses, 0b0111), None);
        assert_eq!(layout_for_mask(&buses, 0b1_0000), None);
    }

    #[test]
    fn scatter_and_gather_follow_bus_order() {
        let mapper = BusMapper {
            audio_in: vec![bus(BusType::Main, 2, &[0, 2])],
            audio_out: vec![bus(BusType::Main, 1, &[0, 1])],
            ..Default::default()
        };
        let mut ins = mapper.allocate_buffers(BusDirection::Input, 4);
        let left = [1.0f32; 4];
        mapper.scatter_inputs(&[&left], &mut ins, 4);
        assert_eq!(ins[0].channel(0), Some(&[1.0f32; 4][..]));
        assert_eq!(ins[0].channel(1), Some(&[0.0f32; 4][..]));

        let mut outs = mapper.allocate_buffers(BusDirection::Output, 4);
        outs[0].channel_mut(0).unwrap().fill(0.5);
        let mut a = [9.0f32; 4];
        let mut b = [9.0f32; 4];
        {
            let mut host: Vec<&mut [f32]> = vec![&mut a, &mut b];
            mapper.gather_outputs(&outs, &mut host, 4);
        }
        assert_eq!(a, [0.5; 4]);
        assert_eq!(b, [0.0; 4]);
    }

    #[test]
    fn aux_buses_are_counted_separately() {
        let mapper = BusMapper {
            audio_in: vec![bus(BusType::Main, 2, &[2]), bus(BusType::Aux, 2, &[0, 2])],
            audio_out: vec![bus(BusType::Main, 2, &[2])],
            ..Default::default()
        };
        assert_eq!(mapper.n_audio_aux_in(), 1);
        assert_eq!(mapper.n_audio_aux_out(), 0);
        assert_eq!(mapper.count_channels(MediaType::Audio, BusDirection::Input, None), 4);
        assert_eq!(
            mapper.count_channels(MediaType::Audio, BusDirection::Input, Some(BusType::Main)),
            2
        );
    }
}
