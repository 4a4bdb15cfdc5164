use dma_spwm::clock::{PWM_CTL, PWM_DMAC, PWM_RNG1, PWMCLK_CNTL, PWMCLK_DIV};
use dma_spwm::control_block::{DMA_D_DREQ, DMA_NO_WIDE_BURSTS, DMA_WAIT_RESP};
use dma_spwm::dma::{self, DMA_CONBLK_AD, DMA_CS, DMA_DEBUG, DMA_GO};
use dma_spwm::{
    ChannelStateError, DMA_CHANNELS, DmaPwm, DmaPwmBuilder, PageFault, PwmError, RegisterWindow,
    SUBCYCLE_TIME_US_DEFAULT, SUBCYCLE_TIME_US_MAX, SUBCYCLE_TIME_US_MIN, Simulated, SocLayout,
};
use std::time::Duration;

fn test_create_pwm(increment_us: u32) -> DmaPwm<Simulated> {
    DmaPwmBuilder::new()
        .increment_us(increment_us)
        .unwrap()
        .build(Simulated::new())
        .unwrap()
}

fn test_create_pwm_with_backend(backend: Simulated) -> DmaPwm<Simulated> {
    DmaPwmBuilder::new()
        .default_increment()
        .build(backend)
        .unwrap()
}

#[test]
fn construct_configures_pwm_clock() {
    let pwm = test_create_pwm(10);
    let regs = pwm.peripherals();

    assert_eq!(regs.pwm().read(PWM_CTL), 0x21);
    assert_eq!(regs.pwm().read(PWM_RNG1), 100);
    assert_eq!(regs.pwm().read(PWM_DMAC), 0x8000_0F0F);
    assert_eq!(regs.clk().read(PWMCLK_CNTL), 0x5A00_0016);
    assert_eq!(regs.clk().read(PWMCLK_DIV), 0x5A03_2000);
    assert_eq!(pwm.backend().settled(), Duration::from_micros(350));
}

#[test]
fn construct_rng_follows_increment() {
    let pwm = test_create_pwm(4);

    assert_eq!(pwm.peripherals().pwm().read(PWM_RNG1), 40);
}

#[test]
fn init_channel_with_default_subcycle() {
    let mut pwm = test_create_pwm(10);

    let result = pwm.init_channel(0, SUBCYCLE_TIME_US_DEFAULT);
    assert!(result.is_ok());

    let channel = pwm.channel(0);
    assert!(channel.is_some());
    let channel = channel.unwrap();
    assert_eq!(channel.subcycle_us(), 20_000);
    assert_eq!(channel.sample_count(), 2000);
    assert_eq!(channel.max_width(), 2000);
    assert_eq!(channel.geometry().control_block_count(), 4000);
    assert_eq!(channel.geometry().page_count(), 34);
    assert_eq!(channel.page_map().page_count(), 34);
    assert!(channel.samples().iter().all(|&sample| sample == 0));
    assert_eq!(pwm.backend().arena_allocations(), 1);
}

#[test]
fn init_channel_starts_dma_engine() {
    let mut pwm = test_create_pwm(10);
    let channel_id = 3;

    let result = pwm.init_channel(channel_id, SUBCYCLE_TIME_US_DEFAULT);
    assert!(result.is_ok());

    let head = pwm.channel(channel_id).unwrap().head_bus_address();
    let regs = pwm.peripherals().dma();
    assert_eq!(regs.read(dma::register_index(channel_id, DMA_CS)), DMA_GO);
    assert_eq!(DMA_GO, 0x1088_0001);
    assert_eq!(regs.read(dma::register_index(channel_id, DMA_CONBLK_AD)), head);
    assert_eq!(regs.read(dma::register_index(channel_id, DMA_DEBUG)), 7);
    assert_eq!(regs.read(dma::register_index(0, DMA_CS)), 0);
    assert_eq!(
        pwm.backend().settled(),
        Duration::from_micros(350) + dma::RESET_SETTLE
    );
}

#[test]
fn init_channel_head_is_first_page() {
    let mut pwm = test_create_pwm(10);
    assert!(pwm.init_channel(0, SUBCYCLE_TIME_US_DEFAULT).is_ok());

    let channel = pwm.channel(0).unwrap();
    // the simulated backend hands out frames in descending order
    assert_eq!(channel.head_bus_address(), 0x4102_1000);
    assert_eq!(channel.page_map().bus_address(4096), 0x4102_0000);
}

#[test]
fn init_channel_builds_circular_chain() {
    let mut pwm = test_create_pwm(10);
    assert!(pwm.init_channel(0, SUBCYCLE_TIME_US_MIN).is_ok());

    let channel = pwm.channel(0).unwrap();
    let geometry = *channel.geometry();
    let page_map = channel.page_map();
    let targets = SocLayout::BCM2835.dma_targets();
    let blocks = geometry.control_block_count();

    for sample in 0..channel.sample_count() {
        let gpio_block = channel.control_block(2 * sample).unwrap();
        assert_eq!(gpio_block[0], DMA_NO_WIDE_BURSTS | DMA_WAIT_RESP);
        assert_eq!(gpio_block[1], page_map.bus_address(geometry.sample_offset(sample)));
        assert_eq!(gpio_block[2], targets.gpio_clear);
        assert_eq!(gpio_block[3], 4);
        assert_eq!(
            gpio_block[5],
            page_map.bus_address(geometry.control_block_offset(2 * sample + 1))
        );

        let delay_block = channel.control_block(2 * sample + 1).unwrap();
        assert_eq!(delay_block[0], DMA_NO_WIDE_BURSTS | DMA_WAIT_RESP | DMA_D_DREQ | (5 << 16));
        assert_eq!(delay_block[1], page_map.bus_address(geometry.sample_offset(0)));
        assert_eq!(delay_block[2], targets.pwm_fifo);
        assert_eq!(delay_block[3], 4);
    }

    assert_eq!(channel.control_block(blocks - 1).unwrap()[5], channel.head_bus_address());
}

#[test]
fn init_channel_twice() {
    let mut pwm = test_create_pwm(10);

    let result = pwm.init_channel(1, SUBCYCLE_TIME_US_DEFAULT);
    assert!(result.is_ok());
    let result = pwm.init_channel(1, SUBCYCLE_TIME_US_DEFAULT);
    assert!(result.is_err());
    assert_eq!(
        result.unwrap_err().channel_state(),
        Some(ChannelStateError::AlreadyInitialized)
    );
    assert_eq!(pwm.backend().arena_allocations(), 1);
}

#[test]
fn init_all_channels() {
    let mut pwm = test_create_pwm(10);

    for channel_id in 0..DMA_CHANNELS {
        let result = pwm.init_channel(channel_id, SUBCYCLE_TIME_US_MIN);
        assert!(result.is_ok());
    }

    let result = pwm.init_channel(DMA_CHANNELS, SUBCYCLE_TIME_US_MIN);
    assert!(result.is_err());
    assert_eq!(
        result.unwrap_err().channel_state(),
        Some(ChannelStateError::InvalidChannel)
    );
    assert_eq!(pwm.backend().arena_allocations(), DMA_CHANNELS);
}

#[test]
fn init_channel_with_invalid_subcycle() {
    let mut pwm = test_create_pwm(10);
    let test_invalid_subcycles = [0, 1000, SUBCYCLE_TIME_US_MIN - 1];

    for subcycle_us in test_invalid_subcycles {
        let result = pwm.init_channel(0, subcycle_us);
        assert!(
            result.is_err(),
            "Successful init with a too short subcycle: {subcycle_us}"
        );
        assert_eq!(
            result.unwrap_err().channel_state(),
            Some(ChannelStateError::SubcycleTooShort { subcycle_us })
        );
    }

    let subcycle_us = SUBCYCLE_TIME_US_MAX + 1;
    let result = pwm.init_channel(0, subcycle_us);
    assert_eq!(
        result.unwrap_err().channel_state(),
        Some(ChannelStateError::SubcycleTooLong { subcycle_us })
    );

    assert!(pwm.channel(0).is_none());
    assert_eq!(pwm.backend().arena_allocations(), 0);
}

#[test]
fn init_channel_with_unresolvable_page() {
    let mut pwm = test_create_pwm_with_backend(Simulated::with_page_fault(PageFault::NotPresent));

    let result = pwm.init_channel(2, SUBCYCLE_TIME_US_DEFAULT);
    assert!(result.is_err());
    assert!(matches!(
        result.unwrap_err(),
        PwmError::PageResolution {
            reason: PageFault::NotPresent,
            ..
        }
    ));
    assert!(pwm.channel(2).is_none());
    assert_eq!(pwm.peripherals().dma().read(dma::register_index(2, DMA_CS)), 0);
}

#[test]
fn channels_get_distinct_memory() {
    let mut pwm = test_create_pwm(10);
    assert!(pwm.init_channel(0, SUBCYCLE_TIME_US_MIN).is_ok());
    assert!(pwm.init_channel(1, SUBCYCLE_TIME_US_MIN).is_ok());

    let head0 = pwm.channel(0).unwrap().head_bus_address();
    let head1 = pwm.channel(1).unwrap().head_bus_address();
    assert_ne!(head0, head1);
}

#[test]
fn shared_engine_behind_mutex() {
    use std::sync::{Arc, Mutex};

    let pwm = Arc::new(Mutex::new(test_create_pwm(10)));
    assert!(pwm.lock().unwrap().init_channel(0, SUBCYCLE_TIME_US_MIN).is_ok());

    let handles: Vec<_> = [4u8, 17, 22]
        .into_iter()
        .map(|gpio| {
            let pwm = Arc::clone(&pwm);
            std::thread::spawn(move || {
                pwm.lock()
                    .unwrap()
                    .add_channel_pulse(0, gpio, u32::from(gpio), 10)
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    let pwm = pwm.lock().unwrap();
    let channel = pwm.channel(0).unwrap();
    for gpio in [4u8, 17, 22] {
        assert_ne!(channel.sample(usize::from(gpio)).unwrap() & (1 << gpio), 0);
    }
    assert_eq!(pwm.gpio_setup(), (1 << 4) | (1 << 17) | (1 << 22));
}

#[test]
fn init_channel_on_bcm2836_uses_its_alias() {
    let layout = SocLayout::BCM2836;
    let mut pwm = DmaPwmBuilder::new()
        .layout(layout)
        .default_increment()
        .build(Simulated::new())
        .unwrap();

    assert_eq!(layout.pwm_base(), 0x3F20_C000);
    assert_eq!(layout.clk_base(), 0x3F10_1000);
    assert_eq!(layout.gpio_base(), 0x3F20_0000);
    assert_eq!(layout.pcm_base(), 0x3F20_3000);
    assert_eq!(layout.dma_base(), 0x3F00_7000);

    assert!(pwm.init_channel(0, SUBCYCLE_TIME_US_DEFAULT).is_ok());
    let channel = pwm.channel(0).unwrap();

    // first arena page is the 34th frame handed out, samples start in page 31
    assert_eq!(channel.head_bus_address(), 0xC102_1000);
    let sample_bus = channel.page_map().bus_address(channel.geometry().sample_offset(0));
    assert_eq!(sample_bus, 0xC100_2400);
    assert_eq!(channel.control_block(0).unwrap()[1], sample_bus);
    assert_eq!(channel.control_block(0).unwrap()[2], 0x7E20_0028);
    assert_eq!(channel.control_block(1).unwrap()[2], 0x7E20_C018);
    assert_eq!(
        pwm.peripherals().dma().read(dma::register_index(0, DMA_CONBLK_AD)),
        0xC102_1000
    );
}

#[test]
fn inspection_past_the_end_is_none() {
    let mut pwm = test_create_pwm(10);
    assert!(pwm.init_channel(0, SUBCYCLE_TIME_US_MIN).is_ok());
    let channel = pwm.channel(0).unwrap();

    assert_eq!(channel.sample(299), Some(0));
    assert_eq!(channel.sample(300), None);
    assert!(channel.control_block(599).is_some());
    assert_eq!(channel.control_block(600), None);
}
